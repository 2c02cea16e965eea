//! FPM wire framing.
//!
//! The routing daemon streams netlink messages wrapped in a 4-byte FPM
//! header: `{version: u8, type: u8, length: u16be}` where `length` covers
//! the header itself. Frames arrive back-to-back and may split across
//! reads; [`FrameSplitter`] reassembles them.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

pub const FPM_VERSION: u8 = 1;
/// Payload is a netlink message.
pub const FPM_MSG_TYPE_NETLINK: u8 = 1;
pub const FPM_HEADER_LEN: usize = 4;

/// Largest frame accepted; anything bigger is a protocol violation.
pub const FPM_MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FpmError {
    #[error("unsupported FPM version {0}")]
    BadVersion(u8),

    #[error("unsupported FPM message type {0}")]
    BadType(u8),

    #[error("frame length {0} out of range")]
    BadLength(usize),
}

/// Wraps a netlink payload in an FPM frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let total = FPM_HEADER_LEN + payload.len();
    let mut frame = Vec::with_capacity(total);
    frame.push(FPM_VERSION);
    frame.push(FPM_MSG_TYPE_NETLINK);
    frame.extend_from_slice(&(total as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Reassembles FPM frames from a byte stream.
#[derive(Default)]
pub struct FrameSplitter {
    buf: Vec<u8>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete netlink payload, if a whole frame is buffered.
    pub fn next_payload(&mut self) -> Result<Option<Vec<u8>>, FpmError> {
        if self.buf.len() < FPM_HEADER_LEN {
            return Ok(None);
        }
        let version = self.buf[0];
        if version != FPM_VERSION {
            return Err(FpmError::BadVersion(version));
        }
        let msg_type = self.buf[1];
        if msg_type != FPM_MSG_TYPE_NETLINK {
            return Err(FpmError::BadType(msg_type));
        }
        let total = BigEndian::read_u16(&self.buf[2..4]) as usize;
        if !(FPM_HEADER_LEN..=FPM_MAX_FRAME_LEN).contains(&total) {
            return Err(FpmError::BadLength(total));
        }
        if self.buf.len() < total {
            return Ok(None);
        }
        let payload = self.buf[FPM_HEADER_LEN..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn frame_round_trip() {
        let payload = vec![1u8, 2, 3, 4, 5];
        let frame = encode_frame(&payload);
        assert_eq!(frame.len(), FPM_HEADER_LEN + payload.len());
        assert_eq!(frame[0], FPM_VERSION);
        assert_eq!(frame[1], FPM_MSG_TYPE_NETLINK);

        let mut splitter = FrameSplitter::new();
        splitter.push(&frame);
        assert_eq!(splitter.next_payload().unwrap(), Some(payload));
        assert_eq!(splitter.next_payload().unwrap(), None);
    }

    #[test]
    fn split_reads_reassemble() {
        let payload = vec![9u8; 40];
        let frame = encode_frame(&payload);
        let mut splitter = FrameSplitter::new();

        splitter.push(&frame[..3]);
        assert_eq!(splitter.next_payload().unwrap(), None);
        splitter.push(&frame[3..10]);
        assert_eq!(splitter.next_payload().unwrap(), None);
        splitter.push(&frame[10..]);
        assert_eq!(splitter.next_payload().unwrap(), Some(payload));
    }

    #[test]
    fn back_to_back_frames() {
        let a = encode_frame(&[1, 1]);
        let b = encode_frame(&[2, 2, 2]);
        let mut splitter = FrameSplitter::new();
        splitter.push(&a);
        splitter.push(&b);
        assert_eq!(splitter.next_payload().unwrap(), Some(vec![1, 1]));
        assert_eq!(splitter.next_payload().unwrap(), Some(vec![2, 2, 2]));
        assert_eq!(splitter.next_payload().unwrap(), None);
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut frame = encode_frame(&[0]);
        frame[0] = 9;
        let mut splitter = FrameSplitter::new();
        splitter.push(&frame);
        assert_eq!(splitter.next_payload(), Err(FpmError::BadVersion(9)));
    }
}
