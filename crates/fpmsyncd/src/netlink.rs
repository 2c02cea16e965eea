//! Typed decode of the netlink route messages carried by FPM frames and the
//! kernel route socket.
//!
//! Nothing outside this module sees raw wire bytes: decoding yields
//! [`NetlinkRecord`]s, and the only byte-level operation exposed is flipping
//! the offload flag for the echo path. The encoder exists for the echo of
//! store-restored routes and for the test suite; it is the exact mirror of
//! the decoder.

use byteorder::{ByteOrder, NativeEndian};
use std::str::FromStr;
use switchd_types::{IpAddress, IpPrefix, MacAddress};
use thiserror::Error;

pub const RTM_NEWROUTE: u16 = 24;
pub const RTM_DELROUTE: u16 = 25;
// FPM extension of the routing daemon for SRv6 local SIDs.
pub const RTM_NEWSRV6LOCALSID: u16 = 116;
pub const RTM_DELSRV6LOCALSID: u16 = 117;

/// Route has been offloaded to hardware.
pub const RTM_F_OFFLOAD: u32 = 0x4000;

pub const AF_INET: u8 = 2;
pub const AF_INET6: u8 = 10;
pub const AF_MPLS: u8 = 28;

const NLMSG_HDRLEN: usize = 16;
const RTMSG_LEN: usize = 12;
const RTATTR_HDRLEN: usize = 4;
const RTNEXTHOP_HDRLEN: usize = 8;

// rtattr types of interest.
const RTA_DST: u16 = 1;
const RTA_OIF: u16 = 4;
const RTA_GATEWAY: u16 = 5;
const RTA_PREFSRC: u16 = 7;
const RTA_MULTIPATH: u16 = 9;
const RTA_ENCAP_TYPE: u16 = 21;
const RTA_ENCAP: u16 = 22;

// Lightweight-tunnel encap kinds.
const LWTUNNEL_ENCAP_MPLS: u16 = 1;
const LWTUNNEL_ENCAP_SEG6: u16 = 5;
const LWTUNNEL_ENCAP_SEG6_LOCAL: u16 = 7;
// FPM extension for EVPN overlay next hops.
const LWTUNNEL_ENCAP_VXLAN: u16 = 100;

const MPLS_IPTUNNEL_DST: u16 = 1;

const SEG6_IPTUNNEL_SRH: u16 = 1;
const SEG6_IPTUNNEL_SRC: u16 = 2;

const VXLAN_ENCAP_VNI: u16 = 1;
const VXLAN_ENCAP_RMAC: u16 = 2;

// SRv6 local-SID attrs, per the routing daemon's FPM headers.
const SEG6_LOCAL_ACTION: u16 = 1;
const SEG6_LOCAL_NH4: u16 = 3;
const SEG6_LOCAL_NH6: u16 = 4;
const SEG6_LOCAL_SID_FORMAT: u16 = 11;
const SEG6_LOCAL_VRF_NAME: u16 = 12;

const SID_FORMAT_BLOCK_LEN: u16 = 1;
const SID_FORMAT_NODE_LEN: u16 = 2;
const SID_FORMAT_FUNC_LEN: u16 = 3;
const SID_FORMAT_ARG_LEN: u16 = 4;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message truncated at {0}")]
    Truncated(&'static str),

    #[error("bad attribute length {0}")]
    BadAttribute(u16),

    #[error("unsupported address family {0}")]
    BadFamily(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOp {
    Add,
    Del,
}

/// One next hop of a route, with its encapsulations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteNextHop {
    pub gateway: Option<IpAddress>,
    pub ifindex: Option<u32>,
    /// rtnexthop hop count + 1; 1 for single-path routes.
    pub weight: u32,
    pub labels: Vec<u32>,
    pub vni: Option<u32>,
    pub router_mac: Option<MacAddress>,
    pub vpn_sid: Option<IpAddress>,
    pub seg_src: Option<IpAddress>,
}

impl RouteNextHop {
    /// Fixture constructor for a plain gateway next hop.
    #[cfg(test)]
    pub fn gateway(ip: &str) -> Self {
        Self {
            gateway: Some(ip.parse().expect("test address")),
            weight: 1,
            ..Self::default()
        }
    }
}

/// A unicast route, either address family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub op: RouteOp,
    pub prefix: IpPrefix,
    pub protocol: u8,
    pub offloaded: bool,
    pub nexthops: Vec<RouteNextHop>,
}

/// An MPLS in-label route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRouteRecord {
    pub op: RouteOp,
    pub in_label: u32,
    pub offloaded: bool,
    pub nexthops: Vec<RouteNextHop>,
}

/// SRv6 local-SID behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSidAction {
    End,
    EndX,
    EndT,
    EndDx6,
    EndDx4,
    EndDt4,
    EndDt6,
    EndDt46,
    Un,
    Ua,
    Udx6,
    Udx4,
    Udt4,
    Udt6,
    Udt46,
}

impl LocalSidAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalSidAction::End => "end",
            LocalSidAction::EndX => "end.x",
            LocalSidAction::EndT => "end.t",
            LocalSidAction::EndDx6 => "end.dx6",
            LocalSidAction::EndDx4 => "end.dx4",
            LocalSidAction::EndDt4 => "end.dt4",
            LocalSidAction::EndDt6 => "end.dt6",
            LocalSidAction::EndDt46 => "end.dt46",
            LocalSidAction::Un => "un",
            LocalSidAction::Ua => "ua",
            LocalSidAction::Udx6 => "udx6",
            LocalSidAction::Udx4 => "udx4",
            LocalSidAction::Udt4 => "udt4",
            LocalSidAction::Udt6 => "udt6",
            LocalSidAction::Udt46 => "udt46",
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        Some(match value {
            1 => LocalSidAction::End,
            2 => LocalSidAction::EndX,
            3 => LocalSidAction::EndT,
            4 => LocalSidAction::EndDx6,
            5 => LocalSidAction::EndDx4,
            6 => LocalSidAction::EndDt4,
            7 => LocalSidAction::EndDt6,
            8 => LocalSidAction::EndDt46,
            9 => LocalSidAction::Un,
            10 => LocalSidAction::Ua,
            11 => LocalSidAction::Udx6,
            12 => LocalSidAction::Udx4,
            13 => LocalSidAction::Udt4,
            14 => LocalSidAction::Udt6,
            15 => LocalSidAction::Udt46,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> u32 {
        match self {
            LocalSidAction::End => 1,
            LocalSidAction::EndX => 2,
            LocalSidAction::EndT => 3,
            LocalSidAction::EndDx6 => 4,
            LocalSidAction::EndDx4 => 5,
            LocalSidAction::EndDt4 => 6,
            LocalSidAction::EndDt6 => 7,
            LocalSidAction::EndDt46 => 8,
            LocalSidAction::Un => 9,
            LocalSidAction::Ua => 10,
            LocalSidAction::Udx6 => 11,
            LocalSidAction::Udx4 => 12,
            LocalSidAction::Udt4 => 13,
            LocalSidAction::Udt6 => 14,
            LocalSidAction::Udt46 => 15,
        }
    }
}

impl FromStr for LocalSidAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(
            (1..=15u32)
                .find(|v| LocalSidAction::from_wire(*v).map(|a| a.as_str()) == Some(s))
                .ok_or(())?,
        )
        .ok_or(())
    }
}

/// An SRv6 local SID and its behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSidRecord {
    pub op: RouteOp,
    pub sid: IpAddress,
    pub block_len: u8,
    pub node_len: u8,
    pub func_len: u8,
    pub arg_len: u8,
    pub action: LocalSidAction,
    pub vrf: Option<String>,
    pub adj: Option<IpAddress>,
}

/// What a netlink message decoded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetlinkRecord {
    Route(RouteRecord),
    LabelRoute(LabelRouteRecord),
    LocalSid(LocalSidRecord),
    /// A message type the bridge does not handle.
    Other { msg_type: u16 },
}

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// Iterator over an rtattr region.
struct Attrs<'a> {
    buf: &'a [u8],
}

impl<'a> Attrs<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for Attrs<'a> {
    type Item = Result<(u16, &'a [u8]), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < RTATTR_HDRLEN {
            return None;
        }
        let len = NativeEndian::read_u16(&self.buf[0..2]) as usize;
        let kind = NativeEndian::read_u16(&self.buf[2..4]);
        if len < RTATTR_HDRLEN || len > self.buf.len() {
            self.buf = &[];
            return Some(Err(DecodeError::BadAttribute(len as u16)));
        }
        let payload = &self.buf[RTATTR_HDRLEN..len];
        self.buf = &self.buf[align4(len).min(self.buf.len())..];
        Some(Ok((kind, payload)))
    }
}

fn read_ip(family: u8, payload: &[u8]) -> Result<IpAddress, DecodeError> {
    match family {
        AF_INET if payload.len() >= 4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&payload[..4]);
            Ok(IpAddress::from(std::net::Ipv4Addr::from(octets)))
        }
        AF_INET6 if payload.len() >= 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&payload[..16]);
            Ok(IpAddress::from(std::net::Ipv6Addr::from(octets)))
        }
        _ => Err(DecodeError::Truncated("address")),
    }
}

/// Parses the MPLS label stack of an encap: 4-byte label entries with the
/// label in the top 20 bits, bottom-of-stack in bit 8.
fn parse_label_stack(payload: &[u8]) -> Vec<u32> {
    payload
        .chunks_exact(4)
        .map(|chunk| {
            let entry = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            entry >> 12
        })
        .collect()
}

fn encode_label_stack(labels: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(labels.len() * 4);
    for (i, label) in labels.iter().enumerate() {
        let mut entry = label << 12;
        if i == labels.len() - 1 {
            entry |= 1 << 8; // bottom of stack
        }
        out.extend_from_slice(&entry.to_be_bytes());
    }
    out
}

/// Applies one encap region to a next hop under construction.
fn parse_encap(encap_type: u16, payload: &[u8], nh: &mut RouteNextHop) -> Result<(), DecodeError> {
    match encap_type {
        LWTUNNEL_ENCAP_MPLS => {
            for attr in Attrs::new(payload) {
                let (kind, value) = attr?;
                if kind == MPLS_IPTUNNEL_DST {
                    nh.labels = parse_label_stack(value);
                }
            }
        }
        LWTUNNEL_ENCAP_SEG6 => {
            for attr in Attrs::new(payload) {
                let (kind, value) = attr?;
                match kind {
                    SEG6_IPTUNNEL_SRH => {
                        // SRH header (8 bytes) followed by 16-byte segments;
                        // the VPN SID is the first segment.
                        if value.len() >= 8 + 16 {
                            nh.vpn_sid = Some(read_ip(AF_INET6, &value[8..24])?);
                        }
                    }
                    SEG6_IPTUNNEL_SRC => {
                        nh.seg_src = Some(read_ip(AF_INET6, value)?);
                    }
                    _ => {}
                }
            }
        }
        LWTUNNEL_ENCAP_VXLAN => {
            for attr in Attrs::new(payload) {
                let (kind, value) = attr?;
                match kind {
                    VXLAN_ENCAP_VNI if value.len() >= 4 => {
                        nh.vni = Some(NativeEndian::read_u32(value));
                    }
                    VXLAN_ENCAP_RMAC if value.len() >= 6 => {
                        let mut mac = [0u8; 6];
                        mac.copy_from_slice(&value[..6]);
                        nh.router_mac = Some(MacAddress::new(mac));
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Decodes one netlink message into a typed record.
pub fn decode(buf: &[u8]) -> Result<NetlinkRecord, DecodeError> {
    if buf.len() < NLMSG_HDRLEN {
        return Err(DecodeError::Truncated("nlmsghdr"));
    }
    let msg_len = NativeEndian::read_u32(&buf[0..4]) as usize;
    let msg_type = NativeEndian::read_u16(&buf[4..6]);
    if msg_len > buf.len() {
        return Err(DecodeError::Truncated("message body"));
    }

    let op = match msg_type {
        RTM_NEWROUTE | RTM_NEWSRV6LOCALSID => RouteOp::Add,
        RTM_DELROUTE | RTM_DELSRV6LOCALSID => RouteOp::Del,
        other => return Ok(NetlinkRecord::Other { msg_type: other }),
    };

    if msg_len < NLMSG_HDRLEN + RTMSG_LEN || buf.len() < NLMSG_HDRLEN + RTMSG_LEN {
        return Err(DecodeError::Truncated("rtmsg"));
    }
    let body = &buf[NLMSG_HDRLEN..msg_len];
    let family = body[0];
    let dst_len = body[1];
    let protocol = body[5];
    let flags = NativeEndian::read_u32(&body[8..12]);
    let offloaded = flags & RTM_F_OFFLOAD != 0;
    let attrs_buf = &body[RTMSG_LEN..];

    if msg_type == RTM_NEWSRV6LOCALSID || msg_type == RTM_DELSRV6LOCALSID {
        return decode_local_sid(op, family, attrs_buf);
    }

    if family == AF_MPLS {
        return decode_label_route(op, offloaded, attrs_buf);
    }
    if family != AF_INET && family != AF_INET6 {
        return Err(DecodeError::BadFamily(family));
    }

    let mut dst: Option<IpAddress> = None;
    let mut top_nh = RouteNextHop {
        weight: 1,
        ..RouteNextHop::default()
    };
    let mut top_encap: Option<Vec<u8>> = None;
    let mut top_encap_type: Option<u16> = None;
    let mut multipath: Vec<RouteNextHop> = Vec::new();

    for attr in Attrs::new(attrs_buf) {
        let (kind, value) = attr?;
        match kind {
            RTA_DST => dst = Some(read_ip(family, value)?),
            RTA_GATEWAY => top_nh.gateway = Some(read_ip(family, value)?),
            RTA_OIF if value.len() >= 4 => {
                top_nh.ifindex = Some(NativeEndian::read_u32(value))
            }
            RTA_PREFSRC => top_nh.seg_src = top_nh.seg_src.or(Some(read_ip(family, value)?)),
            RTA_ENCAP_TYPE if value.len() >= 2 => {
                top_encap_type = Some(NativeEndian::read_u16(value))
            }
            RTA_ENCAP => top_encap = Some(value.to_vec()),
            RTA_MULTIPATH => {
                multipath = parse_multipath(family, value)?;
            }
            _ => {}
        }
    }
    if let (Some(encap_type), Some(payload)) = (top_encap_type, &top_encap) {
        parse_encap(encap_type, payload, &mut top_nh)?;
    }

    let default_dst = if family == AF_INET {
        IpAddress::UNSPECIFIED_V4
    } else {
        IpAddress::UNSPECIFIED_V6
    };
    let prefix = IpPrefix::new(dst.unwrap_or(default_dst), dst_len)
        .map_err(|_| DecodeError::Truncated("prefix length"))?;

    let nexthops = if multipath.is_empty() {
        vec![top_nh]
    } else {
        multipath
    };

    Ok(NetlinkRecord::Route(RouteRecord {
        op,
        prefix,
        protocol,
        offloaded,
        nexthops,
    }))
}

fn parse_multipath(family: u8, buf: &[u8]) -> Result<Vec<RouteNextHop>, DecodeError> {
    let mut nexthops = Vec::new();
    let mut rest = buf;
    while rest.len() >= RTNEXTHOP_HDRLEN {
        let len = NativeEndian::read_u16(&rest[0..2]) as usize;
        if len < RTNEXTHOP_HDRLEN || len > rest.len() {
            return Err(DecodeError::Truncated("rtnexthop"));
        }
        let hops = rest[3];
        let ifindex = NativeEndian::read_u32(&rest[4..8]);

        let mut nh = RouteNextHop {
            ifindex: Some(ifindex),
            weight: hops as u32 + 1,
            ..RouteNextHop::default()
        };
        let mut encap_type: Option<u16> = None;
        let mut encap: Option<Vec<u8>> = None;
        for attr in Attrs::new(&rest[RTNEXTHOP_HDRLEN..len]) {
            let (kind, value) = attr?;
            match kind {
                RTA_GATEWAY => nh.gateway = Some(read_ip(family, value)?),
                RTA_ENCAP_TYPE if value.len() >= 2 => {
                    encap_type = Some(NativeEndian::read_u16(value))
                }
                RTA_ENCAP => encap = Some(value.to_vec()),
                _ => {}
            }
        }
        if let (Some(encap_type), Some(payload)) = (encap_type, &encap) {
            parse_encap(encap_type, payload, &mut nh)?;
        }
        nexthops.push(nh);
        rest = &rest[align4(len)..];
    }
    Ok(nexthops)
}

fn decode_label_route(
    op: RouteOp,
    offloaded: bool,
    attrs_buf: &[u8],
) -> Result<NetlinkRecord, DecodeError> {
    let mut in_label = 0u32;
    let mut nh = RouteNextHop {
        weight: 1,
        ..RouteNextHop::default()
    };
    for attr in Attrs::new(attrs_buf) {
        let (kind, value) = attr?;
        match kind {
            RTA_DST if value.len() >= 4 => {
                in_label = u32::from_be_bytes([value[0], value[1], value[2], value[3]]) >> 12;
            }
            // Label routes carry their v4 next hop in RTA_VIA-style bytes;
            // the first byte pair is the family.
            RTA_GATEWAY if value.len() >= 4 => {
                nh.gateway = Some(read_ip(AF_INET, value)?);
            }
            RTA_OIF if value.len() >= 4 => nh.ifindex = Some(NativeEndian::read_u32(value)),
            _ => {}
        }
    }
    Ok(NetlinkRecord::LabelRoute(LabelRouteRecord {
        op,
        in_label,
        offloaded,
        nexthops: vec![nh],
    }))
}

fn decode_local_sid(
    op: RouteOp,
    family: u8,
    attrs_buf: &[u8],
) -> Result<NetlinkRecord, DecodeError> {
    if family != AF_INET6 {
        return Err(DecodeError::BadFamily(family));
    }
    let mut sid: Option<IpAddress> = None;
    let mut action: Option<LocalSidAction> = None;
    let mut block_len = 0u8;
    let mut node_len = 0u8;
    let mut func_len = 0u8;
    let mut arg_len = 0u8;
    let mut vrf: Option<String> = None;
    let mut adj: Option<IpAddress> = None;

    for attr in Attrs::new(attrs_buf) {
        let (kind, value) = attr?;
        match kind {
            RTA_DST => sid = Some(read_ip(AF_INET6, value)?),
            RTA_ENCAP => {
                for nested in Attrs::new(value) {
                    let (nkind, nvalue) = nested?;
                    match nkind {
                        SEG6_LOCAL_ACTION if nvalue.len() >= 4 => {
                            action = LocalSidAction::from_wire(NativeEndian::read_u32(nvalue));
                        }
                        SEG6_LOCAL_NH4 => adj = Some(read_ip(AF_INET, nvalue)?),
                        SEG6_LOCAL_NH6 => adj = Some(read_ip(AF_INET6, nvalue)?),
                        SEG6_LOCAL_VRF_NAME => {
                            vrf = Some(
                                String::from_utf8_lossy(nvalue)
                                    .trim_end_matches('\0')
                                    .to_string(),
                            );
                        }
                        SEG6_LOCAL_SID_FORMAT => {
                            for fmt in Attrs::new(nvalue) {
                                let (fkind, fvalue) = fmt?;
                                let byte = *fvalue.first().unwrap_or(&0);
                                match fkind {
                                    SID_FORMAT_BLOCK_LEN => block_len = byte,
                                    SID_FORMAT_NODE_LEN => node_len = byte,
                                    SID_FORMAT_FUNC_LEN => func_len = byte,
                                    SID_FORMAT_ARG_LEN => arg_len = byte,
                                    _ => {}
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    Ok(NetlinkRecord::LocalSid(LocalSidRecord {
        op,
        sid: sid.ok_or(DecodeError::Truncated("local sid"))?,
        block_len,
        node_len,
        func_len,
        arg_len,
        action: action.ok_or(DecodeError::Truncated("local sid action"))?,
        vrf,
        adj,
    }))
}

// ----------------------------------------------------------------------
// Offload flag manipulation (the echo path)
// ----------------------------------------------------------------------

/// Sets `RTM_F_OFFLOAD` in a raw route message, in place. Returns false if
/// the buffer is not a route message.
pub fn set_offload_flag(buf: &mut [u8]) -> bool {
    if buf.len() < NLMSG_HDRLEN + RTMSG_LEN {
        return false;
    }
    let msg_type = NativeEndian::read_u16(&buf[4..6]);
    if msg_type != RTM_NEWROUTE && msg_type != RTM_DELROUTE {
        return false;
    }
    let flags_at = NLMSG_HDRLEN + 8;
    let flags = NativeEndian::read_u32(&buf[flags_at..flags_at + 4]) | RTM_F_OFFLOAD;
    NativeEndian::write_u32(&mut buf[flags_at..flags_at + 4], flags);
    true
}

// ----------------------------------------------------------------------
// Encoder (echo of restored routes, test fixtures)
// ----------------------------------------------------------------------

struct AttrWriter {
    buf: Vec<u8>,
}

impl AttrWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn put(&mut self, kind: u16, payload: &[u8]) {
        let len = RTATTR_HDRLEN + payload.len();
        self.buf.extend_from_slice(&(len as u16).to_ne_bytes());
        self.buf.extend_from_slice(&kind.to_ne_bytes());
        self.buf.extend_from_slice(payload);
        self.buf.resize(align4(self.buf.len()), 0);
    }

    fn put_nested(&mut self, kind: u16, inner: AttrWriter) {
        self.put(kind, &inner.buf);
    }
}

fn ip_bytes(ip: &IpAddress) -> Vec<u8> {
    match ip.inner() {
        std::net::IpAddr::V4(a) => a.octets().to_vec(),
        std::net::IpAddr::V6(a) => a.octets().to_vec(),
    }
}

fn encode_nh_encaps(nh: &RouteNextHop, attrs: &mut AttrWriter) {
    if !nh.labels.is_empty() {
        attrs.put(RTA_ENCAP_TYPE, &LWTUNNEL_ENCAP_MPLS.to_ne_bytes());
        let mut encap = AttrWriter::new();
        encap.put(MPLS_IPTUNNEL_DST, &encode_label_stack(&nh.labels));
        attrs.put_nested(RTA_ENCAP, encap);
    } else if nh.vpn_sid.is_some() {
        attrs.put(RTA_ENCAP_TYPE, &LWTUNNEL_ENCAP_SEG6.to_ne_bytes());
        let mut encap = AttrWriter::new();
        if let Some(sid) = &nh.vpn_sid {
            let mut srh = vec![0u8; 8];
            srh.extend_from_slice(&ip_bytes(sid));
            encap.put(SEG6_IPTUNNEL_SRH, &srh);
        }
        if let Some(src) = &nh.seg_src {
            encap.put(SEG6_IPTUNNEL_SRC, &ip_bytes(src));
        }
        attrs.put_nested(RTA_ENCAP, encap);
    } else if nh.vni.is_some() {
        attrs.put(RTA_ENCAP_TYPE, &LWTUNNEL_ENCAP_VXLAN.to_ne_bytes());
        let mut encap = AttrWriter::new();
        if let Some(vni) = nh.vni {
            encap.put(VXLAN_ENCAP_VNI, &vni.to_ne_bytes());
        }
        if let Some(mac) = &nh.router_mac {
            encap.put(VXLAN_ENCAP_RMAC, &mac.octets());
        }
        attrs.put_nested(RTA_ENCAP, encap);
    }
}

/// Encodes a route record as the netlink message the decoder accepts.
pub fn encode_route(record: &RouteRecord) -> Vec<u8> {
    let family = if record.prefix.is_ipv4() {
        AF_INET
    } else {
        AF_INET6
    };
    let mut attrs = AttrWriter::new();
    attrs.put(RTA_DST, &ip_bytes(&record.prefix.address()));

    if record.nexthops.len() == 1 {
        let nh = &record.nexthops[0];
        if let Some(gw) = &nh.gateway {
            attrs.put(RTA_GATEWAY, &ip_bytes(gw));
        }
        if let Some(ifindex) = nh.ifindex {
            attrs.put(RTA_OIF, &ifindex.to_ne_bytes());
        }
        encode_nh_encaps(nh, &mut attrs);
    } else {
        let mut multipath = Vec::new();
        for nh in &record.nexthops {
            let mut nh_attrs = AttrWriter::new();
            if let Some(gw) = &nh.gateway {
                nh_attrs.put(RTA_GATEWAY, &ip_bytes(gw));
            }
            encode_nh_encaps(nh, &mut nh_attrs);

            let len = RTNEXTHOP_HDRLEN + nh_attrs.buf.len();
            multipath.extend_from_slice(&(len as u16).to_ne_bytes());
            multipath.push(0); // rtnh_flags
            multipath.push(nh.weight.saturating_sub(1) as u8);
            multipath.extend_from_slice(&nh.ifindex.unwrap_or(0).to_ne_bytes());
            multipath.extend_from_slice(&nh_attrs.buf);
            multipath.resize(align4(multipath.len()), 0);
        }
        attrs.put(RTA_MULTIPATH, &multipath);
    }

    let msg_type = match record.op {
        RouteOp::Add => RTM_NEWROUTE,
        RouteOp::Del => RTM_DELROUTE,
    };
    let flags = if record.offloaded { RTM_F_OFFLOAD } else { 0 };
    finish_message(msg_type, family, record.prefix.len(), record.protocol, flags, attrs)
}

/// Encodes a local-SID record as the netlink message the decoder accepts.
pub fn encode_local_sid(record: &LocalSidRecord) -> Vec<u8> {
    let mut attrs = AttrWriter::new();
    attrs.put(RTA_DST, &ip_bytes(&record.sid));

    let mut encap = AttrWriter::new();
    encap.put(SEG6_LOCAL_ACTION, &record.action.to_wire().to_ne_bytes());
    if let Some(adj) = &record.adj {
        let kind = if adj.is_ipv4() {
            SEG6_LOCAL_NH4
        } else {
            SEG6_LOCAL_NH6
        };
        encap.put(kind, &ip_bytes(adj));
    }
    if let Some(vrf) = &record.vrf {
        encap.put(SEG6_LOCAL_VRF_NAME, vrf.as_bytes());
    }
    let mut format = AttrWriter::new();
    format.put(SID_FORMAT_BLOCK_LEN, &[record.block_len]);
    format.put(SID_FORMAT_NODE_LEN, &[record.node_len]);
    format.put(SID_FORMAT_FUNC_LEN, &[record.func_len]);
    format.put(SID_FORMAT_ARG_LEN, &[record.arg_len]);
    encap.put_nested(SEG6_LOCAL_SID_FORMAT, format);
    attrs.put_nested(RTA_ENCAP, encap);

    let msg_type = match record.op {
        RouteOp::Add => RTM_NEWSRV6LOCALSID,
        RouteOp::Del => RTM_DELSRV6LOCALSID,
    };
    finish_message(msg_type, AF_INET6, 128, 0, 0, attrs)
}

fn finish_message(
    msg_type: u16,
    family: u8,
    dst_len: u8,
    protocol: u8,
    flags: u32,
    attrs: AttrWriter,
) -> Vec<u8> {
    let total = NLMSG_HDRLEN + RTMSG_LEN + attrs.buf.len();
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(total as u32).to_ne_bytes());
    buf.extend_from_slice(&msg_type.to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes()); // nlmsg_flags
    buf.extend_from_slice(&0u32.to_ne_bytes()); // seq
    buf.extend_from_slice(&0u32.to_ne_bytes()); // pid

    buf.push(family);
    buf.push(dst_len);
    buf.push(0); // src_len
    buf.push(0); // tos
    buf.push(0); // table
    buf.push(protocol);
    buf.push(0); // scope
    buf.push(1); // type: unicast
    buf.extend_from_slice(&flags.to_ne_bytes());

    buf.extend_from_slice(&attrs.buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn route(prefix: &str, nexthops: Vec<RouteNextHop>) -> RouteRecord {
        RouteRecord {
            op: RouteOp::Add,
            prefix: prefix.parse().unwrap(),
            protocol: 186, // bgp
            offloaded: false,
            nexthops,
        }
    }

    #[test]
    fn single_path_round_trip() {
        let record = route(
            "10.1.0.0/24",
            vec![RouteNextHop {
                gateway: Some("10.0.0.1".parse().unwrap()),
                ifindex: Some(7),
                weight: 1,
                ..RouteNextHop::default()
            }],
        );
        let bytes = encode_route(&record);
        assert_eq!(decode(&bytes).unwrap(), NetlinkRecord::Route(record));
    }

    #[test]
    fn multipath_with_weights_round_trip() {
        let record = route(
            "10.2.0.0/24",
            vec![
                RouteNextHop {
                    gateway: Some("10.0.0.1".parse().unwrap()),
                    ifindex: Some(1),
                    weight: 3,
                    ..RouteNextHop::default()
                },
                RouteNextHop {
                    gateway: Some("10.0.0.2".parse().unwrap()),
                    ifindex: Some(2),
                    weight: 1,
                    ..RouteNextHop::default()
                },
            ],
        );
        let bytes = encode_route(&record);
        assert_eq!(decode(&bytes).unwrap(), NetlinkRecord::Route(record));
    }

    #[test]
    fn mpls_encap_round_trip() {
        let record = route(
            "10.3.0.0/24",
            vec![RouteNextHop {
                gateway: Some("10.0.0.1".parse().unwrap()),
                ifindex: Some(3),
                weight: 1,
                labels: vec![10100, 10101],
                ..RouteNextHop::default()
            }],
        );
        let bytes = encode_route(&record);
        assert_eq!(decode(&bytes).unwrap(), NetlinkRecord::Route(record));
    }

    #[test]
    fn evpn_encap_round_trip() {
        let record = route(
            "10.4.0.0/24",
            vec![RouteNextHop {
                gateway: Some("192.0.2.10".parse().unwrap()),
                ifindex: Some(4),
                weight: 1,
                vni: Some(5000),
                router_mac: Some("52:54:00:aa:bb:cc".parse().unwrap()),
                ..RouteNextHop::default()
            }],
        );
        let bytes = encode_route(&record);
        assert_eq!(decode(&bytes).unwrap(), NetlinkRecord::Route(record));
    }

    #[test]
    fn srv6_steer_round_trip() {
        let record = route(
            "2001:db8:100::/48",
            vec![RouteNextHop {
                weight: 1,
                ifindex: Some(5),
                vpn_sid: Some("fc00:0:2:1::".parse().unwrap()),
                seg_src: Some("fc00:0:1::1".parse().unwrap()),
                ..RouteNextHop::default()
            }],
        );
        let bytes = encode_route(&record);
        assert_eq!(decode(&bytes).unwrap(), NetlinkRecord::Route(record));
    }

    #[test]
    fn local_sid_round_trip() {
        let record = LocalSidRecord {
            op: RouteOp::Add,
            sid: "fc00:0:1:1::".parse().unwrap(),
            block_len: 32,
            node_len: 16,
            func_len: 16,
            arg_len: 0,
            action: LocalSidAction::EndDt46,
            vrf: Some("Vrf-blue".to_string()),
            adj: None,
        };
        let bytes = encode_local_sid(&record);
        assert_eq!(decode(&bytes).unwrap(), NetlinkRecord::LocalSid(record));
    }

    #[test]
    fn offload_flag_detect_and_set() {
        let record = route(
            "10.5.0.0/24",
            vec![RouteNextHop::gateway("10.0.0.1")],
        );
        let mut bytes = encode_route(&record);
        match decode(&bytes).unwrap() {
            NetlinkRecord::Route(r) => assert!(!r.offloaded),
            other => panic!("unexpected: {other:?}"),
        }

        assert!(set_offload_flag(&mut bytes));
        match decode(&bytes).unwrap() {
            NetlinkRecord::Route(r) => assert!(r.offloaded),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_message_types_pass_through() {
        let mut bytes = encode_route(&route("10.6.0.0/24", vec![RouteNextHop::gateway("10.0.0.1")]));
        bytes[4] = 16; // RTM_NEWLINK
        bytes[5] = 0;
        match decode(&bytes).unwrap() {
            NetlinkRecord::Other { msg_type } => assert_eq!(msg_type, 16),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn truncated_messages_are_rejected() {
        let bytes = encode_route(&route("10.7.0.0/24", vec![RouteNextHop::gateway("10.0.0.1")]));
        assert!(decode(&bytes[..10]).is_err());
    }

    #[test]
    fn action_names() {
        assert_eq!(LocalSidAction::End.as_str(), "end");
        assert_eq!(LocalSidAction::EndDt46.as_str(), "end.dt46");
        assert_eq!("ua".parse::<LocalSidAction>().unwrap(), LocalSidAction::Ua);
        assert!("bogus".parse::<LocalSidAction>().is_err());
    }
}
