//! The configuration manager trait.

use async_trait::async_trait;
use switchd_orch_common::WarmRestartState;

/// Default admin status applied to ports that carry none in config.
pub const DEFAULT_ADMIN_STATUS: &str = "up";

/// Default MTU for ports and aggregates.
pub const DEFAULT_MTU: &str = "9100";

/// A configuration manager daemon.
///
/// Managers subscribe to their config tables, apply entries through the
/// kernel-link adapter, publish results to the app store and mark readiness
/// in the state store. The warm-restart hooks let the daemon shell drive
/// replay without knowing the manager's tables.
#[async_trait]
pub trait CfgMgr: Send {
    /// Daemon name, as published to the warm-restart table.
    fn daemon_name(&self) -> &str;

    /// Config-store tables this manager consumes.
    fn config_tables(&self) -> &[&str];

    /// State-store tables this manager watches for dependency readiness.
    fn state_tables(&self) -> &[&str] {
        &[]
    }

    /// Current warm-restart state.
    fn warm_restart_state(&self) -> WarmRestartState {
        WarmRestartState::Disabled
    }

    /// Drives one round of pending work.
    async fn drain(&mut self);
}
