//! The teamd control adapter.
//!
//! Aggregation groups are run by teamd; this trait wraps its lifecycle and
//! port control so the manager never builds command strings.

use async_trait::async_trait;
use std::sync::Mutex;
use switchd_cfgmgr_common::shell::{self, shellquote, TEAMDCTL_CMD, TEAMD_CMD};
use switchd_cfgmgr_common::{CfgMgrError, CfgMgrResult};
use switchd_types::MacAddress;

/// Team lifecycle and membership operations.
#[async_trait]
pub trait TeamCtl: Send + Sync {
    /// Starts a teamd instance for the aggregate with an LACP runner.
    /// `min_links` and `fallback` are fixed for the team's lifetime.
    async fn start_team(
        &self,
        alias: &str,
        mac: &MacAddress,
        min_links: Option<u32>,
        fallback: bool,
    ) -> CfgMgrResult<()>;

    /// Kills the teamd instance.
    async fn stop_team(&self, alias: &str) -> CfgMgrResult<()>;

    async fn add_port(&self, team: &str, member: &str) -> CfgMgrResult<()>;

    async fn remove_port(&self, team: &str, member: &str) -> CfgMgrResult<()>;
}

/// Shelling implementation over `teamd`/`teamdctl`.
pub struct ShellTeamCtl;

impl ShellTeamCtl {
    /// teamd JSON config: LACP runner, device MAC, optional min_ports and
    /// fallback.
    fn team_config(
        alias: &str,
        mac: &MacAddress,
        min_links: Option<u32>,
        fallback: bool,
    ) -> String {
        let mut runner = serde_json::json!({
            "active": "true",
            "name": "lacp",
        });
        if let Some(min) = min_links {
            runner["min_ports"] = serde_json::json!(min);
        }
        if fallback {
            runner["fallback"] = serde_json::json!("true");
        }
        serde_json::json!({
            "device": alias,
            "hwaddr": mac.to_string(),
            "runner": runner,
        })
        .to_string()
    }
}

#[async_trait]
impl TeamCtl for ShellTeamCtl {
    async fn start_team(
        &self,
        alias: &str,
        mac: &MacAddress,
        min_links: Option<u32>,
        fallback: bool,
    ) -> CfgMgrResult<()> {
        let config = Self::team_config(alias, mac, min_links, fallback);
        let cmd = format!(
            "{TEAMD_CMD} -r -t {} -c {} -d",
            shellquote(alias),
            shellquote(&config)
        );
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }

    async fn stop_team(&self, alias: &str) -> CfgMgrResult<()> {
        let cmd = format!("{TEAMD_CMD} -k -t {}", shellquote(alias));
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }

    async fn add_port(&self, team: &str, member: &str) -> CfgMgrResult<()> {
        let cmd = format!(
            "{TEAMDCTL_CMD} {} port add {}",
            shellquote(team),
            shellquote(member)
        );
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }

    async fn remove_port(&self, team: &str, member: &str) -> CfgMgrResult<()> {
        let cmd = format!(
            "{TEAMDCTL_CMD} {} port remove {}",
            shellquote(team),
            shellquote(member)
        );
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }
}

/// One observed team operation, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamCtlCall {
    StartTeam {
        alias: String,
        mac: String,
        min_links: Option<u32>,
        fallback: bool,
    },
    StopTeam { alias: String },
    AddPort { team: String, member: String },
    RemovePort { team: String, member: String },
}

/// Test double recording team operations.
#[derive(Default)]
pub struct RecordingTeamCtl {
    calls: Mutex<Vec<TeamCtlCall>>,
    fail_ops: Mutex<Vec<&'static str>>,
}

impl RecordingTeamCtl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TeamCtlCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_on(&self, op: &'static str) {
        self.fail_ops.lock().unwrap().push(op);
    }

    fn record(&self, op: &'static str, call: TeamCtlCall) -> CfgMgrResult<()> {
        if self.fail_ops.lock().unwrap().contains(&op) {
            return Err(CfgMgrError::CommandFailed {
                command: op.to_string(),
                exit_code: 1,
                output: "injected failure".to_string(),
            });
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl TeamCtl for RecordingTeamCtl {
    async fn start_team(
        &self,
        alias: &str,
        mac: &MacAddress,
        min_links: Option<u32>,
        fallback: bool,
    ) -> CfgMgrResult<()> {
        self.record(
            "start_team",
            TeamCtlCall::StartTeam {
                alias: alias.to_string(),
                mac: mac.to_string(),
                min_links,
                fallback,
            },
        )
    }

    async fn stop_team(&self, alias: &str) -> CfgMgrResult<()> {
        self.record(
            "stop_team",
            TeamCtlCall::StopTeam {
                alias: alias.to_string(),
            },
        )
    }

    async fn add_port(&self, team: &str, member: &str) -> CfgMgrResult<()> {
        self.record(
            "add_port",
            TeamCtlCall::AddPort {
                team: team.to_string(),
                member: member.to_string(),
            },
        )
    }

    async fn remove_port(&self, team: &str, member: &str) -> CfgMgrResult<()> {
        self.record(
            "remove_port",
            TeamCtlCall::RemovePort {
                team: team.to_string(),
                member: member.to_string(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn teamd_config_shape() {
        let mac: MacAddress = "52:54:00:11:22:33".parse().unwrap();
        let config = ShellTeamCtl::team_config("PortChannel7", &mac, Some(2), true);
        let parsed: serde_json::Value = serde_json::from_str(&config).unwrap();
        assert_eq!(parsed["device"], "PortChannel7");
        assert_eq!(parsed["hwaddr"], "52:54:00:11:22:33");
        assert_eq!(parsed["runner"]["name"], "lacp");
        assert_eq!(parsed["runner"]["active"], "true");
        assert_eq!(parsed["runner"]["min_ports"], 2);
        assert_eq!(parsed["runner"]["fallback"], "true");
    }

    #[test]
    fn teamd_config_omits_optional_settings() {
        let mac: MacAddress = "52:54:00:11:22:33".parse().unwrap();
        let config = ShellTeamCtl::team_config("PortChannel1", &mac, None, false);
        let parsed: serde_json::Value = serde_json::from_str(&config).unwrap();
        assert!(parsed["runner"].get("min_ports").is_none());
        assert!(parsed["runner"].get("fallback").is_none());
    }
}
