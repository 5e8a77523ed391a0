//! Reconciliation protocol message definitions.
//!
//! Messages travel as `[u32 length][u8 type][payload]` frames; see
//! [`crate::codec`] for the byte layout.

use std::collections::BTreeMap;
use std::fmt;

use sks_recon_core::{Bitstring, ZSet, Zp};

/// Protocol limits.
pub mod limits {
    /// Largest length or count accepted from the wire.
    pub const MAX_READ_LEN: usize = 1 << 24;

    /// Requests are no longer queued once the server queue reaches this length.
    pub const MAX_REQUEST_QUEUE_LEN: usize = 60_000;

    /// Elements a client accumulates per session before stopping.
    pub const MAX_RECOVER_SIZE: usize = 20_000;
}

/// Handshake status sent when the remote configuration is acceptable.
pub const CONFIG_PASSED: &str = "passed";

/// Handshake status sent before a rejection reason.
pub const CONFIG_FAILED: &str = "failed";

/// Rejection reason sent while the local tree is being mutated.
pub const BUSY_RESPONSE: &str = "sync not available, currently mutating";

/// Wire message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    ReconRqstPoly = 0,
    ReconRqstFull = 1,
    Elements = 2,
    FullElements = 3,
    SyncFail = 4,
    Done = 5,
    Flush = 6,
    Error = 7,
    DbRqst = 8,
    DbRepl = 9,
    Config = 10,
}

impl TryFrom<u8> for MsgType {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0 => MsgType::ReconRqstPoly,
            1 => MsgType::ReconRqstFull,
            2 => MsgType::Elements,
            3 => MsgType::FullElements,
            4 => MsgType::SyncFail,
            5 => MsgType::Done,
            6 => MsgType::Flush,
            7 => MsgType::Error,
            8 => MsgType::DbRqst,
            9 => MsgType::DbRepl,
            10 => MsgType::Config,
            other => return Err(other),
        })
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Session parameters each side announces before reconciling.
///
/// `bit_quantum` and `mbar` must match for sample values to be comparable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub version: String,
    pub http_port: u32,
    pub bit_quantum: u32,
    pub mbar: u32,
    /// Comma-separated filter names.
    pub filters: String,
    /// Any other key/value pairs the remote sent.
    pub custom: BTreeMap<String, String>,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Config: Version={} HTTPPort={} BitQuantum={} MBar={} Filters={}",
            self.version, self.http_port, self.bit_quantum, self.mbar, self.filters
        )
    }
}

/// A reconciliation protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconMsg {
    /// Compare a node by its sample values.
    ReconRqstPoly {
        prefix: Bitstring,
        size: usize,
        samples: Vec<Zp>,
    },

    /// Compare a node by its explicit elements.
    ReconRqstFull { prefix: Bitstring, elements: ZSet },

    /// Elements the receiver is missing.
    Elements(ZSet),

    /// Every element of the requested node.
    FullElements(ZSet),

    /// The node could not be reconciled; descend into its children.
    SyncFail,

    /// No more requests follow.
    Done,

    /// The sender is waiting for replies to everything sent so far.
    Flush,

    Error(String),
    DbRqst(String),
    DbRepl(String),

    Config(Config),
}

impl ReconMsg {
    pub fn msg_type(&self) -> MsgType {
        match self {
            ReconMsg::ReconRqstPoly { .. } => MsgType::ReconRqstPoly,
            ReconMsg::ReconRqstFull { .. } => MsgType::ReconRqstFull,
            ReconMsg::Elements(_) => MsgType::Elements,
            ReconMsg::FullElements(_) => MsgType::FullElements,
            ReconMsg::SyncFail => MsgType::SyncFail,
            ReconMsg::Done => MsgType::Done,
            ReconMsg::Flush => MsgType::Flush,
            ReconMsg::Error(_) => MsgType::Error,
            ReconMsg::DbRqst(_) => MsgType::DbRqst,
            ReconMsg::DbRepl(_) => MsgType::DbRepl,
            ReconMsg::Config(_) => MsgType::Config,
        }
    }
}

impl fmt::Display for ReconMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconMsg::ReconRqstPoly {
                prefix,
                size,
                samples,
            } => write!(
                f,
                "ReconRqstPoly: prefix={} size={} samples={}",
                prefix,
                size,
                samples.len()
            ),
            ReconMsg::ReconRqstFull { prefix, elements } => write!(
                f,
                "ReconRqstFull: prefix={} ({} elements)",
                prefix,
                elements.len()
            ),
            ReconMsg::Elements(zs) | ReconMsg::FullElements(zs) => {
                write!(f, "{}: {} elements", self.msg_type(), zs.len())
            }
            ReconMsg::Error(text) | ReconMsg::DbRqst(text) | ReconMsg::DbRepl(text) => {
                write!(f, "{}: {}", self.msg_type(), text)
            }
            ReconMsg::Config(config) => config.fmt(f),
            ReconMsg::SyncFail | ReconMsg::Done | ReconMsg::Flush => self.msg_type().fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_type_codes() {
        for code in 0u8..=10 {
            let t = MsgType::try_from(code).unwrap();
            assert_eq!(t as u8, code);
        }
        assert_eq!(MsgType::try_from(11), Err(11));
    }

    #[test]
    fn test_display() {
        let msg = ReconMsg::ReconRqstFull {
            prefix: Bitstring::from_bytes(3, &[0b1010_0000]),
            elements: ZSet::new(),
        };
        assert_eq!(msg.to_string(), "ReconRqstFull: prefix=101 (0 elements)");
        assert_eq!(ReconMsg::Done.to_string(), "Done");
        assert_eq!(ReconMsg::Error("boom".into()).to_string(), "Error: boom");
    }
}
