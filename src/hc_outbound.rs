use indexmap::{IndexMap, IndexSet};

use crate::hc_interface::{Digest, NodeId, SimTick};
use crate::hc_signal::NodeSignal;

/// Trackers owned by one node, keyed by the hash of the tracked signal.
pub type TrackerTable = IndexMap<Digest, OutboundSignalTracker>;

/// At-least-once delivery bookkeeping for one forwarded signal.
#[derive(Clone, Debug)]
pub struct OutboundSignalTracker {
    signal: NodeSignal,
    pending: IndexSet<NodeId>,
    sent_at: IndexMap<NodeId, SimTick>,
    resends: IndexMap<NodeId, u32>,
}

impl OutboundSignalTracker {
    /// Never targets the signal's author, the owner or the relay it came from.
    pub fn new<'a>(
        signal: NodeSignal,
        relay: &str,
        owner: &str,
        targets: impl IntoIterator<Item = &'a NodeId>,
    ) -> Self {
        let pending = targets
            .into_iter()
            .filter(|t| *t != &signal.origin && t.as_str() != owner && t.as_str() != relay)
            .cloned()
            .collect();
        Self {
            signal,
            pending,
            sent_at: IndexMap::new(),
            resends: IndexMap::new(),
        }
    }

    pub fn signal(&self) -> &NodeSignal {
        &self.signal
    }

    /// Targets due for a (re)send at `tick`. A target is due when it was never
    /// contacted or when `sent_at + delay * factor < tick`. Every returned
    /// target is stamped with `tick` and its resend counter goes up.
    pub fn due_for_resend(
        &mut self,
        tick: SimTick,
        factor: f64,
        delay_of: impl Fn(&str) -> SimTick,
    ) -> Vec<NodeId> {
        let mut due = Vec::new();
        for target in &self.pending {
            let ready = match self.sent_at.get(target) {
                None => true,
                Some(&sent) => (sent as f64) + (delay_of(target) as f64) * factor < tick as f64,
            };
            if ready {
                self.sent_at.insert(target.clone(), tick);
                *self.resends.entry(target.clone()).or_insert(0) += 1;
                due.push(target.clone());
            }
        }
        due
    }

    /// ACK, DENY or a data response: the target is done.
    pub fn mark_final(&mut self, node: &str) {
        self.pending.shift_remove(node);
        self.sent_at.shift_remove(node);
        self.resends.shift_remove(node);
    }

    /// WAIT only refreshes the last-contact time.
    pub fn mark_wait(&mut self, node: &str, tick: SimTick) {
        if self.pending.contains(node) {
            self.sent_at.insert(node.to_string(), tick);
        }
    }

    /// Stop tracking targets resent more than `limit` times. Their counters
    /// stay so the owner can tear the links down once the tracker drains.
    pub fn remove_stalled(&mut self, limit: u32) {
        let resends = &self.resends;
        self.pending
            .retain(|node| resends.get(node).map_or(true, |count| *count <= limit));
    }

    pub fn waiting(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, node: &str) -> bool {
        self.pending.contains(node)
    }

    /// Targets that were dropped for stalling and never answered.
    pub fn stalled(&self) -> impl Iterator<Item = &NodeId> {
        self.resends
            .keys()
            .filter(move |node| !self.pending.contains(*node))
    }
}
