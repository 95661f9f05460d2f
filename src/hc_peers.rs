use indexmap::{IndexMap, IndexSet};

use crate::hc_interface::{NodeId, SimTick};

/// Slot targets never drop below this many links.
pub const MIN_SLOTS: usize = 2;

/// Upload and download link tables of one node, plus what it needs to throttle
/// them: slot targets, cooldowns, liveness stamps and byte counters.
///
/// Tables keep insertion order so excess links close oldest first and every
/// scan is reproducible.
#[derive(Clone, Debug)]
pub struct PeerLinks {
    // peer -> link delay
    uploads: IndexMap<NodeId, SimTick>,
    downloads: IndexMap<NodeId, SimTick>,

    upload_target: usize,
    download_target: usize,

    cooldown: IndexMap<NodeId, SimTick>,
    last_seen: IndexMap<NodeId, SimTick>,

    bytes_sent: u64,
    bytes_received: u64,
    upload_utilization: u64,
    download_utilization: u64,
    last_check: SimTick,
}

impl PeerLinks {
    pub fn new(initial_slots: usize) -> Self {
        Self {
            uploads: IndexMap::new(),
            downloads: IndexMap::new(),
            upload_target: initial_slots,
            download_target: initial_slots,
            cooldown: IndexMap::new(),
            last_seen: IndexMap::new(),
            bytes_sent: 0,
            bytes_received: 0,
            upload_utilization: 0,
            download_utilization: 0,
            last_check: 0,
        }
    }

    // ===== Admission =====

    fn admissible(&self, table: &IndexMap<NodeId, SimTick>, target: usize, peer: &str) -> bool {
        !table.contains_key(peer) && !self.cooldown.contains_key(peer) && table.len() < target
    }

    /// A remote node asks to download from us.
    pub fn admit_upload(&mut self, peer: &str, delay: SimTick, tick: SimTick) -> bool {
        if !self.admissible(&self.uploads, self.upload_target, peer) {
            return false;
        }
        self.insert_upload(peer, delay, tick);
        true
    }

    /// A remote node asks to upload to us.
    pub fn admit_download(&mut self, peer: &str, delay: SimTick, tick: SimTick) -> bool {
        if !self.admissible(&self.downloads, self.download_target, peer) {
            return false;
        }
        self.insert_download(peer, delay, tick);
        true
    }

    /// Unconditional insert. A fresh link counts as just seen.
    pub fn insert_upload(&mut self, peer: &str, delay: SimTick, tick: SimTick) {
        self.uploads.insert(peer.to_string(), delay);
        self.last_seen.insert(peer.to_string(), tick);
    }

    pub fn insert_download(&mut self, peer: &str, delay: SimTick, tick: SimTick) {
        self.downloads.insert(peer.to_string(), delay);
        self.last_seen.insert(peer.to_string(), tick);
    }

    pub fn remove_upload(&mut self, peer: &str) -> bool {
        self.uploads.shift_remove(peer).is_some()
    }

    pub fn remove_download(&mut self, peer: &str) -> bool {
        self.downloads.shift_remove(peer).is_some()
    }

    // ===== Cooldowns =====

    pub fn cool_down(&mut self, peer: &str, until: SimTick) {
        self.cooldown.insert(peer.to_string(), until);
    }

    pub fn is_cooling(&self, peer: &str) -> bool {
        self.cooldown.contains_key(peer)
    }

    pub fn expire_cooldowns(&mut self, tick: SimTick) {
        self.cooldown.retain(|_, until| *until > tick);
    }

    // ===== Liveness =====

    pub fn last_seen(&self, peer: &str) -> Option<SimTick> {
        self.last_seen.get(peer).copied()
    }

    pub fn mark_seen(&mut self, peer: &str, tick: SimTick) {
        self.last_seen.insert(peer.to_string(), tick);
    }

    pub fn seen_table(&self) -> &IndexMap<NodeId, SimTick> {
        &self.last_seen
    }

    pub fn stale_uploads(&self, tick: SimTick, window: SimTick) -> Vec<NodeId> {
        self.stale(&self.uploads, tick, window)
    }

    pub fn stale_downloads(&self, tick: SimTick, window: SimTick) -> Vec<NodeId> {
        self.stale(&self.downloads, tick, window)
    }

    fn stale(&self, table: &IndexMap<NodeId, SimTick>, tick: SimTick, window: SimTick) -> Vec<NodeId> {
        table
            .keys()
            .filter(|peer| self.last_seen(peer).unwrap_or(0) + window < tick)
            .cloned()
            .collect()
    }

    // ===== Bandwidth =====

    pub fn record_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
    }

    /// Slot target for one direction: `budget / (bytes / interval)`, clamped to
    /// `[MIN_SLOTS, limit]`. Idle links allow the full limit.
    pub fn slot_target(bytes: u64, interval: SimTick, budget: u64, limit: usize) -> usize {
        let average = bytes as f64 / interval.max(1) as f64;
        let wanted = if average > 0.0 {
            budget as f64 / average
        } else {
            f64::INFINITY
        };

        if wanted > limit as f64 {
            limit.max(MIN_SLOTS)
        } else if wanted > MIN_SLOTS as f64 {
            wanted as usize
        } else {
            MIN_SLOTS
        }
    }

    /// Recompute the upload target from bytes sent since the last check and
    /// reset the counter.
    pub fn retarget_uploads(&mut self, interval: SimTick, budget: u64, limit: usize) -> usize {
        self.upload_utilization = self.bytes_sent / interval.max(1);
        self.upload_target = Self::slot_target(self.bytes_sent, interval, budget, limit);
        self.bytes_sent = 0;
        self.upload_target
    }

    pub fn retarget_downloads(&mut self, interval: SimTick, budget: u64, limit: usize) -> usize {
        self.download_utilization = self.bytes_received / interval.max(1);
        self.download_target = Self::slot_target(self.bytes_received, interval, budget, limit);
        self.bytes_received = 0;
        self.download_target
    }

    // ===== Accessors =====

    /// Delay of an existing link, downloads first.
    pub fn delay_to(&self, peer: &str) -> Option<SimTick> {
        self.downloads
            .get(peer)
            .or_else(|| self.uploads.get(peer))
            .copied()
    }

    pub fn uploads(&self) -> impl Iterator<Item = &NodeId> {
        self.uploads.keys()
    }

    pub fn downloads(&self) -> impl Iterator<Item = &NodeId> {
        self.downloads.keys()
    }

    pub fn has_upload(&self, peer: &str) -> bool {
        self.uploads.contains_key(peer)
    }

    pub fn has_download(&self, peer: &str) -> bool {
        self.downloads.contains_key(peer)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.len()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.len()
    }

    /// Every linked peer once, downloads first.
    pub fn connected(&self) -> IndexSet<NodeId> {
        self.downloads.keys().chain(self.uploads.keys()).cloned().collect()
    }

    pub fn upload_target(&self) -> usize {
        self.upload_target
    }

    pub fn download_target(&self) -> usize {
        self.download_target
    }

    pub fn upload_utilization(&self) -> u64 {
        self.upload_utilization
    }

    pub fn download_utilization(&self) -> u64 {
        self.download_utilization
    }

    pub fn last_check(&self) -> SimTick {
        self.last_check
    }

    pub fn set_last_check(&mut self, tick: SimTick) {
        self.last_check = tick;
    }
}
