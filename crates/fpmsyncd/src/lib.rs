//! fpmsyncd: the routing-protocol-to-store bridge.
//!
//! Two inputs, one output. The routing daemon streams RIB changes over an
//! FPM-framed unix socket; the kernel reports its own route changes over a
//! netlink route socket. Both are decoded to typed records and written to
//! the app-store route tables. When the driver-facing side acknowledges a
//! programmed route, the original message is echoed back with the offload
//! flag set so the routing daemon can mark its RIB entry.

pub mod fpm;
pub mod netlink;
pub mod route_sync;
pub mod tables;
pub mod warm;
