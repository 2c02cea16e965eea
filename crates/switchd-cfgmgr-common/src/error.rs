//! Error types for manager daemons.

use std::io;
use thiserror::Error;

pub type CfgMgrResult<T> = Result<T, CfgMgrError>;

/// Failures of the configuration managers.
#[derive(Debug, Error)]
pub enum CfgMgrError {
    /// The command could not be spawned at all.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The command ran and exited non-zero.
    #[error("'{command}' exited {exit_code}: {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// Store gateway failure.
    #[error("store operation failed: {0}")]
    Store(#[from] switchd_orch_common::StoreError),

    /// Bad key shape, out-of-range id, unknown enum value.
    #[error("invalid configuration for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    /// A referenced dependency is not yet state-ok.
    #[error("dependency {dependency} not ready")]
    NotReady { dependency: String },
}

impl CfgMgrError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        CfgMgrError::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn not_ready(dependency: impl Into<String>) -> Self {
        CfgMgrError::NotReady {
            dependency: dependency.into(),
        }
    }

    /// True for failures that may clear up on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CfgMgrError::NotReady { .. }
                | CfgMgrError::Store(_)
                | CfgMgrError::CommandFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_retryability() {
        let err = CfgMgrError::not_ready("PORT_TABLE|Ethernet0");
        assert_eq!(err.to_string(), "dependency PORT_TABLE|Ethernet0 not ready");
        assert!(err.is_retryable());

        let err = CfgMgrError::invalid("Vlan100|Ethernet0", "unknown tagging mode");
        assert!(!err.is_retryable());
    }
}
