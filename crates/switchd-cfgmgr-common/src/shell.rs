//! Shell command execution with injection-safe quoting.

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{CfgMgrError, CfgMgrResult};

pub const IP_CMD: &str = "/sbin/ip";
pub const BRIDGE_CMD: &str = "/sbin/bridge";
pub const BASH_CMD: &str = "/bin/bash";
pub const GREP_CMD: &str = "/bin/grep";
pub const ECHO_CMD: &str = "/bin/echo";
pub const TEAMD_CMD: &str = "/usr/bin/teamd";
pub const TEAMDCTL_CMD: &str = "/usr/bin/teamdctl";

/// Characters with special meaning inside shell double quotes.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("escape regex"));

/// Wraps `s` in double quotes, escaping `$`, backtick, `"`, `\` and newline.
pub fn shellquote(s: &str) -> String {
    format!("\"{}\"", SHELL_ESCAPE_RE.replace_all(s, r"\$1"))
}

/// Outcome of a shell command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (_, true) => self.stdout.clone(),
            _ => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Runs `cmd` through `/bin/sh -c`, capturing output.
pub async fn exec(cmd: &str) -> CfgMgrResult<ExecResult> {
    tracing::debug!(command = %cmd, "exec");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| CfgMgrError::Spawn {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if !result.success() {
        tracing::warn!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "command failed"
        );
    }
    Ok(result)
}

/// Runs `cmd` and converts a non-zero exit into an error.
pub async fn exec_or_fail(cmd: &str) -> CfgMgrResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(CfgMgrError::CommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn quoting() {
        assert_eq!(shellquote("Ethernet0"), "\"Ethernet0\"");
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("a`b"), "\"a\\`b\"");
        assert_eq!(shellquote("a\"b"), "\"a\\\"b\"");
        assert_eq!(shellquote(""), "\"\"");
    }

    #[tokio::test]
    async fn exec_captures_exit_code() {
        let ok = exec("true").await.unwrap();
        assert!(ok.success());

        let fail = exec("exit 3").await.unwrap();
        assert_eq!(fail.exit_code, 3);
        assert!(!fail.success());
    }

    #[tokio::test]
    async fn exec_or_fail_propagates() {
        assert_eq!(exec_or_fail("echo hi").await.unwrap(), "hi");
        match exec_or_fail("exit 9").await {
            Err(CfgMgrError::CommandFailed { exit_code, .. }) => assert_eq!(exit_code, 9),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
