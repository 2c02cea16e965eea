//! Link state enums shared by the managers and orchestrators.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Configured administrative state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdminStatus {
    Up,
    #[default]
    Down,
}

impl AdminStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AdminStatus::Up => "up",
            AdminStatus::Down => "down",
        }
    }
}

impl fmt::Display for AdminStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(AdminStatus::Up),
            "down" => Ok(AdminStatus::Down),
            other => Err(ParseError::InvalidLinkState(other.to_string())),
        }
    }
}

/// Observed operational state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperStatus {
    Up,
    #[default]
    Down,
}

impl OperStatus {
    pub const fn is_up(&self) -> bool {
        matches!(self, OperStatus::Up)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            OperStatus::Up => "up",
            OperStatus::Down => "down",
        }
    }
}

impl fmt::Display for OperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(OperStatus::Up),
            "down" => Ok(OperStatus::Down),
            other => Err(ParseError::InvalidLinkState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render() {
        assert_eq!("up".parse::<AdminStatus>().unwrap(), AdminStatus::Up);
        assert_eq!(AdminStatus::Down.to_string(), "down");
        assert!("UP".parse::<AdminStatus>().is_err());
        assert!("down".parse::<OperStatus>().unwrap() == OperStatus::Down);
    }
}
