use std::fmt;

use rand::rngs::StdRng;
use serde::Deserialize;
use thiserror::Error;

use crate::hc_config::NetworkConfig;
use crate::hc_events::Event;
use crate::hc_signal::NodeSignal;

// node ids are free-form names taken from the scenario
pub type NodeId = String;
pub type SimTick = u64;
/// Lowercase 64 hex digit SHA-256 of a wire encoding.
pub type Digest = String;

/// Marker used as the previous hash of the first block and the first chunk.
pub const GENESIS_HASH: &str = "INIT";

/// Separates transaction encodings inside a block payload and hashes inside a chunk.
pub const PAYLOAD_SEPARATOR: &str = "||";

// rendered in place of an absent signal payload
pub const NULL_PAYLOAD: &str = "null";

/// Ordinal permission levels. Holding a level implies every lower one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read = 0,
    Publish = 1,
    Write = 2,
    WriteAuth = 3,
}

impl Permission {
    pub fn level(self) -> i64 {
        self as i64
    }

    pub fn from_level(level: i64) -> Result<Self, DecodeError> {
        match level {
            0 => Ok(Permission::Read),
            1 => Ok(Permission::Publish),
            2 => Ok(Permission::Write),
            3 => Ok(Permission::WriteAuth),
            other => Err(DecodeError::UnknownPermission(other)),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::Read => "READ",
            Permission::Publish => "PUBLISH",
            Permission::Write => "WRITE",
            Permission::WriteAuth => "WRITE_AUTH",
        };
        f.write_str(name)
    }
}

/// Failure to parse one of the wire encodings. The receiving node logs it and
/// drops the message; the simulation keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid integer in field `{field}`: {value:?}")]
    BadInteger { field: &'static str, value: String },

    #[error("unknown signal type {0}")]
    UnknownSignal(u8),

    #[error("unknown permission level {0}")]
    UnknownPermission(i64),
}

pub(crate) fn parse_field<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> Result<T, DecodeError> {
    value.parse::<T>().map_err(|_| DecodeError::BadInteger {
        field,
        value: value.to_string(),
    })
}

/// The only unit the scheduler moves between nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct SimJob {
    pub signal: NodeSignal,
    pub target: NodeId,
    pub deliver_at: SimTick,
}

/// Direction of an explicit topology directive, seen from the first node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkDirection {
    /// first node uploads to the second
    Upload,
    /// first node downloads from the second
    Download,
    Both,
}

impl std::str::FromStr for LinkDirection {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "U" => Ok(LinkDirection::Upload),
            "D" => Ok(LinkDirection::Download),
            "UD" | "DU" => Ok(LinkDirection::Both),
            _ => Err(DecodeError::MissingField("direction")),
        }
    }
}

/// A node's whole view of the scheduler.
///
/// Nodes never hold references to each other. Everything that crosses node
/// boundaries (connection brokering, remote link teardown, event logging, the
/// shared seeded RNG) goes through this port, which the network implements
/// for the duration of one delivery or one execution.
pub trait NetworkPort {
    fn current_tick(&self) -> SimTick;

    fn config(&self) -> &NetworkConfig;

    /// Per-pair latency used when no link delay is known.
    fn pair_delay(&self, a: &str, b: &str) -> SimTick;

    /// Find a node that accepts a DOWNLOAD from `caller`. Returns the chosen
    /// node and the link delay.
    fn request_upload(&mut self, caller: &str) -> Option<(NodeId, SimTick)>;

    /// Find a node that accepts an UPLOAD to `caller`.
    fn request_download(&mut self, caller: &str) -> Option<(NodeId, SimTick)>;

    /// Tell `target` that `caller` stopped uploading to it.
    fn close_upload(&mut self, caller: &str, target: &str) -> bool;

    /// Tell `target` that `caller` stopped downloading from it.
    fn close_download(&mut self, caller: &str, target: &str) -> bool;

    fn rng(&mut self) -> &mut StdRng;

    fn log(&mut self, tick: SimTick, origin: &str, event: Event);
}
