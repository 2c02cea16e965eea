//! The kernel-link adapter.
//!
//! All kernel networking mutations the managers perform go through the
//! [`LinkCtl`] trait: explicit methods instead of command strings, so the
//! semantics live in one place and tests observe calls instead of parsing
//! shell text. [`ShellLinkCtl`] is the implementation for platforms without
//! a native netlink binding; it shells out to `ip` and `bridge`.

use crate::error::{CfgMgrError, CfgMgrResult};
use crate::shell::{self, shellquote, BASH_CMD, BRIDGE_CMD, ECHO_CMD, IP_CMD};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Mutex;
use switchd_types::{AdminStatus, IpPrefix, MacAddress, VlanId};

/// Name of the dot1q bridge every VLAN hangs off.
pub const DOT1Q_BRIDGE: &str = "Bridge";

/// Address family of an `ip address` mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(prefix: &IpPrefix) -> Self {
        if prefix.is_ipv4() {
            AddressFamily::V4
        } else {
            AddressFamily::V6
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressFamily::V4 => "IPv4",
            AddressFamily::V6 => "IPv6",
        }
    }
}

/// Bridge-port tagging mode of a VLAN member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaggingMode {
    #[default]
    Untagged,
    Tagged,
    PriorityTagged,
}

impl TaggingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaggingMode::Untagged => "untagged",
            TaggingMode::Tagged => "tagged",
            TaggingMode::PriorityTagged => "priority_tagged",
        }
    }

    /// Argument appended to `bridge vlan add`. Priority-tagged ports carry
    /// the vid untagged like untagged ports do.
    pub fn bridge_arg(&self) -> &'static str {
        match self {
            TaggingMode::Untagged | TaggingMode::PriorityTagged => "pvid untagged",
            TaggingMode::Tagged => "",
        }
    }
}

impl FromStr for TaggingMode {
    type Err = CfgMgrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "untagged" => Ok(TaggingMode::Untagged),
            "tagged" => Ok(TaggingMode::Tagged),
            "priority_tagged" => Ok(TaggingMode::PriorityTagged),
            other => Err(CfgMgrError::invalid(
                "tagging_mode",
                format!("unknown tagging mode '{other}'"),
            )),
        }
    }
}

/// Kernel networking mutations used by the managers.
#[async_trait]
pub trait LinkCtl: Send + Sync {
    /// Creates the dot1q bridge with vlan filtering enabled. Idempotent.
    async fn ensure_bridge(&self, mac: &MacAddress) -> CfgMgrResult<()>;

    /// Creates the `Vlan<N>` netdev on the bridge and the bridge-vlan entry.
    async fn add_vlan_netdev(&self, vlan: VlanId, mac: &MacAddress) -> CfgMgrResult<()>;

    /// Removes the `Vlan<N>` netdev and the bridge-vlan entry.
    async fn del_vlan_netdev(&self, vlan: VlanId) -> CfgMgrResult<()>;

    /// Attaches `port` to the bridge (if not yet) and adds the vlan filter.
    async fn add_bridge_vlan(
        &self,
        port: &str,
        vlan: VlanId,
        tagging: TaggingMode,
    ) -> CfgMgrResult<()>;

    /// Removes the vlan filter from `port`.
    async fn del_bridge_vlan(&self, port: &str, vlan: VlanId) -> CfgMgrResult<()>;

    async fn set_link_admin(&self, alias: &str, status: AdminStatus) -> CfgMgrResult<()>;

    async fn set_link_mtu(&self, alias: &str, mtu: u32) -> CfgMgrResult<()>;

    async fn set_link_address(&self, alias: &str, mac: &MacAddress) -> CfgMgrResult<()>;

    /// Sets or clears the link's master device (bridge, VRF, team).
    async fn set_link_master(&self, alias: &str, master: Option<&str>) -> CfgMgrResult<()>;

    async fn add_address(&self, alias: &str, prefix: &IpPrefix) -> CfgMgrResult<()>;

    async fn del_address(&self, alias: &str, prefix: &IpPrefix) -> CfgMgrResult<()>;
}

/// Shelling implementation over `ip`/`bridge`.
pub struct ShellLinkCtl;

#[async_trait]
impl LinkCtl for ShellLinkCtl {
    async fn ensure_bridge(&self, mac: &MacAddress) -> CfgMgrResult<()> {
        let cmd = format!(
            "{BASH_CMD} -c \"{IP_CMD} link show {DOT1Q_BRIDGE} 2>/dev/null || \
             {IP_CMD} link add {DOT1Q_BRIDGE} up type bridge && \
             {IP_CMD} link set {DOT1Q_BRIDGE} address {mac} && \
             {IP_CMD} link set {DOT1Q_BRIDGE} type bridge vlan_filtering 1 && \
             {BRIDGE_CMD} vlan del vid {default} dev {DOT1Q_BRIDGE} self\"",
            mac = mac,
            default = VlanId::DEFAULT,
        );
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }

    async fn add_vlan_netdev(&self, vlan: VlanId, mac: &MacAddress) -> CfgMgrResult<()> {
        let cmd = format!(
            "{BASH_CMD} -c \"{BRIDGE_CMD} vlan add vid {vid} dev {DOT1Q_BRIDGE} self && \
             {IP_CMD} link add link {DOT1Q_BRIDGE} up name {alias} address {mac} type vlan id {vid}\"",
            vid = vlan,
            alias = vlan.alias(),
        );
        shell::exec_or_fail(&cmd).await?;
        // ARP entries must survive carrier loss on the SVI.
        let arp = format!(
            "{ECHO_CMD} 0 > /proc/sys/net/ipv4/conf/{}/arp_evict_nocarrier",
            vlan.alias()
        );
        let _ = shell::exec(&arp).await;
        Ok(())
    }

    async fn del_vlan_netdev(&self, vlan: VlanId) -> CfgMgrResult<()> {
        let cmd = format!(
            "{BASH_CMD} -c \"{IP_CMD} link del {alias} && \
             {BRIDGE_CMD} vlan del vid {vid} dev {DOT1Q_BRIDGE} self\"",
            alias = vlan.alias(),
            vid = vlan,
        );
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }

    async fn add_bridge_vlan(
        &self,
        port: &str,
        vlan: VlanId,
        tagging: TaggingMode,
    ) -> CfgMgrResult<()> {
        let port_q = shellquote(port);
        let inner = format!(
            "{IP_CMD} link set {port_q} master {DOT1Q_BRIDGE} && \
             {BRIDGE_CMD} vlan del vid {default} dev {port_q} && \
             {BRIDGE_CMD} vlan add vid {vid} dev {port_q} {arg}",
            default = VlanId::DEFAULT,
            vid = vlan,
            arg = tagging.bridge_arg(),
        );
        shell::exec_or_fail(&format!("{BASH_CMD} -c {}", shellquote(&inner))).await?;
        Ok(())
    }

    async fn del_bridge_vlan(&self, port: &str, vlan: VlanId) -> CfgMgrResult<()> {
        let cmd = format!(
            "{BRIDGE_CMD} vlan del vid {vid} dev {port}",
            vid = vlan,
            port = shellquote(port),
        );
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }

    async fn set_link_admin(&self, alias: &str, status: AdminStatus) -> CfgMgrResult<()> {
        let cmd = format!(
            "{IP_CMD} link set dev {} {}",
            shellquote(alias),
            status.as_str()
        );
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }

    async fn set_link_mtu(&self, alias: &str, mtu: u32) -> CfgMgrResult<()> {
        let cmd = format!("{IP_CMD} link set dev {} mtu {}", shellquote(alias), mtu);
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }

    async fn set_link_address(&self, alias: &str, mac: &MacAddress) -> CfgMgrResult<()> {
        let cmd = format!("{IP_CMD} link set dev {} address {}", shellquote(alias), mac);
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }

    async fn set_link_master(&self, alias: &str, master: Option<&str>) -> CfgMgrResult<()> {
        let cmd = match master {
            Some(m) => format!(
                "{IP_CMD} link set {} master {}",
                shellquote(alias),
                shellquote(m)
            ),
            None => format!("{IP_CMD} link set {} nomaster", shellquote(alias)),
        };
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }

    async fn add_address(&self, alias: &str, prefix: &IpPrefix) -> CfgMgrResult<()> {
        let family = if prefix.is_ipv4() { "" } else { "-6 " };
        let cmd = format!(
            "{IP_CMD} {family}address add {prefix} dev {}",
            shellquote(alias)
        );
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }

    async fn del_address(&self, alias: &str, prefix: &IpPrefix) -> CfgMgrResult<()> {
        let family = if prefix.is_ipv4() { "" } else { "-6 " };
        let cmd = format!(
            "{IP_CMD} {family}address del {prefix} dev {}",
            shellquote(alias)
        );
        shell::exec_or_fail(&cmd).await?;
        Ok(())
    }
}

/// One observed adapter call, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCtlCall {
    EnsureBridge { mac: String },
    AddVlanNetdev { vlan: u16, mac: String },
    DelVlanNetdev { vlan: u16 },
    AddBridgeVlan { port: String, vlan: u16, tagging: TaggingMode },
    DelBridgeVlan { port: String, vlan: u16 },
    SetLinkAdmin { alias: String, status: AdminStatus },
    SetLinkMtu { alias: String, mtu: u32 },
    SetLinkAddress { alias: String, mac: String },
    SetLinkMaster { alias: String, master: Option<String> },
    AddAddress { alias: String, prefix: String },
    DelAddress { alias: String, prefix: String },
}

/// Test double that records calls and can fail on request.
#[derive(Default)]
pub struct RecordingLinkCtl {
    calls: Mutex<Vec<LinkCtlCall>>,
    fail_ops: Mutex<Vec<&'static str>>,
}

impl RecordingLinkCtl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<LinkCtlCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Makes the named method fail until cleared.
    pub fn fail_on(&self, op: &'static str) {
        self.fail_ops.lock().unwrap().push(op);
    }

    pub fn clear_failures(&self) {
        self.fail_ops.lock().unwrap().clear();
    }

    fn record(&self, op: &'static str, call: LinkCtlCall) -> CfgMgrResult<()> {
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
impl LinkCtl for RecordingLinkCtl {
    async fn ensure_bridge(&self, mac: &MacAddress) -> CfgMgrResult<()> {
        self.record(
            "ensure_bridge",
            LinkCtlCall::EnsureBridge {
                mac: mac.to_string(),
            },
        )
    }

    async fn add_vlan_netdev(&self, vlan: VlanId, mac: &MacAddress) -> CfgMgrResult<()> {
        self.record(
            "add_vlan_netdev",
            LinkCtlCall::AddVlanNetdev {
                vlan: vlan.as_u16(),
                mac: mac.to_string(),
            },
        )
    }

    async fn del_vlan_netdev(&self, vlan: VlanId) -> CfgMgrResult<()> {
        self.record(
            "del_vlan_netdev",
            LinkCtlCall::DelVlanNetdev {
                vlan: vlan.as_u16(),
            },
        )
    }

    async fn add_bridge_vlan(
        &self,
        port: &str,
        vlan: VlanId,
        tagging: TaggingMode,
    ) -> CfgMgrResult<()> {
        self.record(
            "add_bridge_vlan",
            LinkCtlCall::AddBridgeVlan {
                port: port.to_string(),
                vlan: vlan.as_u16(),
                tagging,
            },
        )
    }

    async fn del_bridge_vlan(&self, port: &str, vlan: VlanId) -> CfgMgrResult<()> {
        self.record(
            "del_bridge_vlan",
            LinkCtlCall::DelBridgeVlan {
                port: port.to_string(),
                vlan: vlan.as_u16(),
            },
        )
    }

    async fn set_link_admin(&self, alias: &str, status: AdminStatus) -> CfgMgrResult<()> {
        self.record(
            "set_link_admin",
            LinkCtlCall::SetLinkAdmin {
                alias: alias.to_string(),
                status,
            },
        )
    }

    async fn set_link_mtu(&self, alias: &str, mtu: u32) -> CfgMgrResult<()> {
        self.record(
            "set_link_mtu",
            LinkCtlCall::SetLinkMtu {
                alias: alias.to_string(),
                mtu,
            },
        )
    }

    async fn set_link_address(&self, alias: &str, mac: &MacAddress) -> CfgMgrResult<()> {
        self.record(
            "set_link_address",
            LinkCtlCall::SetLinkAddress {
                alias: alias.to_string(),
                mac: mac.to_string(),
            },
        )
    }

    async fn set_link_master(&self, alias: &str, master: Option<&str>) -> CfgMgrResult<()> {
        self.record(
            "set_link_master",
            LinkCtlCall::SetLinkMaster {
                alias: alias.to_string(),
                master: master.map(str::to_string),
            },
        )
    }

    async fn add_address(&self, alias: &str, prefix: &IpPrefix) -> CfgMgrResult<()> {
        self.record(
            "add_address",
            LinkCtlCall::AddAddress {
                alias: alias.to_string(),
                prefix: prefix.to_string(),
            },
        )
    }

    async fn del_address(&self, alias: &str, prefix: &IpPrefix) -> CfgMgrResult<()> {
        self.record(
            "del_address",
            LinkCtlCall::DelAddress {
                alias: alias.to_string(),
                prefix: prefix.to_string(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tagging_mode_parse() {
        assert_eq!("untagged".parse::<TaggingMode>().unwrap(), TaggingMode::Untagged);
        assert_eq!("tagged".parse::<TaggingMode>().unwrap(), TaggingMode::Tagged);
        assert_eq!(
            "priority_tagged".parse::<TaggingMode>().unwrap(),
            TaggingMode::PriorityTagged
        );
        assert!("trunk".parse::<TaggingMode>().is_err());
    }

    #[test]
    fn bridge_args() {
        assert_eq!(TaggingMode::Untagged.bridge_arg(), "pvid untagged");
        assert_eq!(TaggingMode::PriorityTagged.bridge_arg(), "pvid untagged");
        assert_eq!(TaggingMode::Tagged.bridge_arg(), "");
    }

    #[tokio::test]
    async fn recording_ctl_captures_calls() {
        let ctl = RecordingLinkCtl::new();
        let vlan = VlanId::new(100).unwrap();
        ctl.add_bridge_vlan("Ethernet0", vlan, TaggingMode::Untagged)
            .await
            .unwrap();
        ctl.set_link_mtu("Ethernet0", 9100).await.unwrap();

        assert_eq!(
            ctl.calls(),
            vec![
                LinkCtlCall::AddBridgeVlan {
                    port: "Ethernet0".to_string(),
                    vlan: 100,
                    tagging: TaggingMode::Untagged,
                },
                LinkCtlCall::SetLinkMtu {
                    alias: "Ethernet0".to_string(),
                    mtu: 9100,
                },
            ]
        );
    }

    #[tokio::test]
    async fn injected_failures_surface() {
        let ctl = RecordingLinkCtl::new();
        ctl.fail_on("set_link_mtu");
        assert!(ctl.set_link_mtu("Ethernet0", 9100).await.is_err());
        ctl.clear_failures();
        assert!(ctl.set_link_mtu("Ethernet0", 9100).await.is_ok());
    }
}
