use std::fmt;

use log::info;

use crate::hc_interface::{Digest, NodeId, SimTick};
use crate::hc_signal::SignalKind;

// ============================================================================
// Event Logging System
// ============================================================================

pub const SPECIAL_ACK_TRANSACTION: &str = "ACK_TRANSACTION";
pub const SPECIAL_ACK_BLOCK: &str = "ACK_BLOCK";
pub const SPECIAL_POOL_LEN: &str = "TRANSACTION_POOL_LEN";
pub const SPECIAL_BLOCK_HEIGHT: &str = "BLOCK_HEIGHT";
pub const SPECIAL_BLOCK_ACCEPTANCE: &str = "BLOCK_ACCEPTANCE";
pub const SPECIAL_NODE_KNOWLEDGE: &str = "NODE_KNOWLEDGE";
pub const SPECIAL_BLOCK_CREATION: &str = "BLOCK_CREATION";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkSide {
    Upload,
    Download,
}

/// Events emitted by nodes for filtering, debugging and transcript comparison.
///
/// Every event travels with the tick it happened at and the node it is
/// attributed to. For `SignalReceived` that node is the relay the signal came
/// from, not the receiver.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    SignalReceived {
        target: NodeId,
        kind: SignalKind,
        hash: Digest,
        payload: Option<String>,
    },
    LinkOpened {
        peer: NodeId,
        side: LinkSide,
        delay: SimTick,
    },
    /// closed after a stall or on request
    LinkClosed {
        peer: NodeId,
        side: LinkSide,
    },
    /// closed because the peer went quiet
    LinkTerminated {
        peer: NodeId,
        side: LinkSide,
    },
    AckQueued {
        kind: SignalKind,
        hash: Digest,
    },
    PoolSize {
        size: usize,
    },
    PoolEvicted {
        count: usize,
    },
    ChainHeight {
        height: u64,
    },
    BlockAccepted {
        creator: NodeId,
        height: u64,
        chain_height: u64,
        encoded: String,
    },
    BlockOutOfTurn {
        creator: NodeId,
        height: u64,
    },
    FutureBlock {
        creator: NodeId,
        height: u64,
    },
    ForgerShifted {
        next: Option<NodeId>,
    },
    AuthBlockAccepted {
        creator: NodeId,
        height: u64,
    },
    PeerKnowledge {
        seen: String,
    },
    BlockCreated {
        fault: &'static str,
    },
    DecodeFailed {
        kind: SignalKind,
        reason: String,
    },
}

/// What a watch filter keys on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventCategory {
    Regular,
    Signal(SignalKind),
    Special(&'static str),
}

impl Event {
    pub fn category(&self) -> EventCategory {
        match self {
            Event::SignalReceived { kind, .. } => EventCategory::Signal(*kind),
            Event::AckQueued { kind, .. } => match kind {
                SignalKind::NewBlock => EventCategory::Special(SPECIAL_ACK_BLOCK),
                _ => EventCategory::Special(SPECIAL_ACK_TRANSACTION),
            },
            Event::PoolSize { .. } => EventCategory::Special(SPECIAL_POOL_LEN),
            Event::ChainHeight { .. } => EventCategory::Special(SPECIAL_BLOCK_HEIGHT),
            Event::BlockAccepted { .. }
            | Event::BlockOutOfTurn { .. }
            | Event::FutureBlock { .. }
            | Event::ForgerShifted { .. } => EventCategory::Special(SPECIAL_BLOCK_ACCEPTANCE),
            Event::PeerKnowledge { .. } => EventCategory::Special(SPECIAL_NODE_KNOWLEDGE),
            Event::BlockCreated { .. } => EventCategory::Special(SPECIAL_BLOCK_CREATION),
            Event::LinkOpened { .. }
            | Event::LinkClosed { .. }
            | Event::LinkTerminated { .. }
            | Event::PoolEvicted { .. }
            | Event::AuthBlockAccepted { .. }
            | Event::DecodeFailed { .. } => EventCategory::Regular,
        }
    }

    /// `"{tick}: {origin} {message}"`, the transcript line format.
    pub fn line(&self, tick: SimTick, origin: &str) -> String {
        format!("{}: {} {}", tick, origin, self)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::SignalReceived {
                target,
                kind,
                hash,
                payload,
            } => write!(
                f,
                "-> {} (sig {}) hash: {}, payload: {}",
                target,
                kind.code(),
                hash,
                payload.as_deref().unwrap_or("null")
            ),
            Event::LinkOpened { peer, side, delay } => match side {
                LinkSide::Upload => write!(f, "New UP connection to {}, delay {}", peer, delay),
                LinkSide::Download => write!(f, "New DOWN connection from {}, delay {}", peer, delay),
            },
            Event::LinkClosed { peer, side } => match side {
                LinkSide::Upload => write!(f, "closed UPLOAD to {}", peer),
                LinkSide::Download => write!(f, "closed DOWNLOAD from {}", peer),
            },
            Event::LinkTerminated { peer, side } => match side {
                LinkSide::Upload => write!(f, "terminated UP to {}", peer),
                LinkSide::Download => write!(f, "terminated DOWN from {}", peer),
            },
            Event::AckQueued { hash, .. } => write!(f, "ACK for signal with hash: {}", hash),
            Event::PoolSize { size } => write!(f, "transaction pool: {}", size),
            Event::PoolEvicted { count } => write!(f, "evicted {} expired transactions", count),
            Event::ChainHeight { height } => write!(f, "blockchain height: {}", height),
            Event::BlockAccepted {
                creator,
                height,
                chain_height,
                encoded,
            } => write!(
                f,
                "Regular block from {}, height {}, new chain height of {} {}",
                creator, height, chain_height, encoded
            ),
            Event::BlockOutOfTurn { creator, height } => {
                write!(f, "Incorrect block received from {}, height {}", creator, height)
            }
            Event::FutureBlock { creator, height } => {
                write!(f, "Future block received from {}, height {}", creator, height)
            }
            Event::ForgerShifted { next } => match next {
                Some(next) => write!(f, "Shifting forger to {}", next),
                None => f.write_str("Shifting forger"),
            },
            Event::AuthBlockAccepted { creator, height } => {
                write!(f, "Authorization block from {}, auth height {}", creator, height)
            }
            Event::PeerKnowledge { seen } => f.write_str(seen),
            Event::BlockCreated { fault } => write!(f, "Will create a new block: {}", fault),
            Event::DecodeFailed { kind, reason } => {
                write!(f, "dropped malformed {} signal: {}", kind, reason)
            }
        }
    }
}

/// Trait for consuming events from the simulation
pub trait EventSink {
    fn log(&mut self, tick: SimTick, origin: &str, event: Event);
}

/// Discards everything.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    #[inline(always)]
    fn log(&mut self, _tick: SimTick, _origin: &str, _event: Event) {}
}

/// Forwards rendered transcript lines to the `log` facade.
pub struct LogSink;

impl EventSink for LogSink {
    fn log(&mut self, tick: SimTick, origin: &str, event: Event) {
        info!("{}", event.line(tick, origin));
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct CollectorSink {
    pub entries: Vec<(SimTick, NodeId, Event)>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(tick, origin, event)| event.line(*tick, origin))
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&str, &Event) -> bool) -> usize {
        self.entries
            .iter()
            .filter(|(_, origin, event)| predicate(origin, event))
            .count()
    }
}

impl EventSink for CollectorSink {
    fn log(&mut self, tick: SimTick, origin: &str, event: Event) {
        self.entries.push((tick, origin.to_string(), event));
    }
}

/// Renders a liveness table as `{a=12, b=40}`.
pub fn render_seen<'a>(entries: impl IntoIterator<Item = (&'a NodeId, &'a SimTick)>) -> String {
    let body = entries
        .into_iter()
        .map(|(id, tick)| format!("{}={}", id, tick))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_rendering() {
        let event = Event::ChainHeight { height: 3 };
        assert_eq!(event.line(120, "node_1"), "120: node_1 blockchain height: 3");

        let event = Event::SignalReceived {
            target: "b".to_string(),
            kind: SignalKind::Active,
            hash: "ff".to_string(),
            payload: None,
        };
        assert_eq!(event.line(5, "a"), "5: a -> b (sig 0) hash: ff, payload: null");
    }

    #[test]
    fn test_categories() {
        let ack_block = Event::AckQueued {
            kind: SignalKind::NewBlock,
            hash: String::new(),
        };
        assert_eq!(ack_block.category(), EventCategory::Special(SPECIAL_ACK_BLOCK));
        assert_eq!(
            Event::ForgerShifted { next: None }.category(),
            EventCategory::Special(SPECIAL_BLOCK_ACCEPTANCE)
        );
        assert_eq!(
            Event::LinkClosed {
                peer: "x".to_string(),
                side: LinkSide::Upload
            }
            .category(),
            EventCategory::Regular
        );
    }

    #[test]
    fn test_collector_and_seen_rendering() {
        let mut sink = CollectorSink::new();
        sink.log(1, "a", Event::PoolSize { size: 2 });
        sink.log(2, "b", Event::PoolSize { size: 3 });
        assert_eq!(sink.count(|origin, _| origin == "b"), 1);
        assert_eq!(sink.lines()[0], "1: a transaction pool: 2");

        let seen: indexmap::IndexMap<NodeId, SimTick> =
            [("a".to_string(), 12), ("b".to_string(), 40)].into_iter().collect();
        assert_eq!(render_seen(&seen), "{a=12, b=40}");
    }
}
