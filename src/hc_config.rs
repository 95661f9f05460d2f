use serde::Deserialize;

use crate::hc_interface::SimTick;

/// Scheduler and protocol constants shared by every node of one network.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    // ===== Processing Delays =====
    /// Worker delay for an ordinary signal (default: 1)
    pub processing_delay: SimTick,

    /// Worker delay for an admitted transaction (default: 2)
    pub transaction_delay: SimTick,

    /// Worker delay for an accepted block (default: 50)
    pub block_delay: SimTick,

    /// Extra main-thread delay when no signals are waiting (default: 1)
    pub empty_queue_delay: SimTick,

    // ===== Periodic Work =====
    /// Heartbeat interval, also the ACTIVE relay suppression window (default: 1000)
    pub active_interval: SimTick,

    /// How often a node re-evaluates its links (default: 500)
    pub connection_check_interval: SimTick,

    // ===== Connection Costs =====
    /// Cost of a node with no recorded cost (default: 20)
    pub default_connection_cost: SimTick,

    /// Smallest per-node cost (default: 10)
    pub min_connection_cost: SimTick,

    /// Width of the random cost range above the minimum (default: 100)
    pub connection_cost_span: SimTick,

    // ===== Consensus Heuristics =====
    /// Blocks appended before a writer folds a new chunk (default: 5)
    pub chunk_threshold: u64,

    /// How many upcoming forgers may legitimately send blocks ahead of time (default: 5)
    pub future_block_window: usize,

    /// Heights beyond the head after which a block is implausible (default: 5)
    pub suspicious_height_gap: u64,

    /// Resend when `sent_at + delay * resend_factor < tick` (default: 2.5)
    pub resend_factor: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            processing_delay: 1,
            transaction_delay: 2,
            block_delay: 50,
            empty_queue_delay: 1,

            active_interval: 1000,
            connection_check_interval: 500,

            default_connection_cost: 20,
            min_connection_cost: 10,
            connection_cost_span: 100,

            chunk_threshold: 5,
            future_block_window: 5,
            suspicious_height_gap: 5,
            resend_factor: 2.5,
        }
    }
}

/// Per-node knobs.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    // ===== Bandwidth =====
    pub upload_speed: u64,
    pub download_speed: u64,

    // ===== Connection Slots =====
    pub upload_limit: usize,
    pub download_limit: usize,
    /// Slot target before the first bandwidth measurement (default: 2)
    pub initial_slots: usize,

    // ===== Virtual Threads =====
    pub worker_threads: usize,
    /// Signals one worker handles before it becomes busy (default: 10)
    pub worker_batch: usize,
    /// Divides the policy's own delay (default: 5)
    pub main_threads: u64,

    // ===== Timeouts =====
    /// Resends after which a target counts as stalled (default: 5)
    pub repetition_threshold: u32,
    pub connection_stale: SimTick,
    pub connection_cooldown: SimTick,
    /// No accepted block for this long while transactions wait (default: 2000)
    pub forger_timeout: SimTick,
    /// Timeouts tolerated before the rotation is skipped (default: 5)
    pub forger_tryout: u32,
    /// Suspicion count that forces a rotation skip (default: 5)
    pub suspicion_threshold: u32,

    // ===== Pool =====
    /// Heights a transaction hash stays in the dedup window (default: 5)
    pub transaction_height_cache: u64,

    // ===== Storage =====
    /// Folded chunks whose block bodies stay stored (default: keep all)
    pub retained_chunks: Option<usize>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            upload_speed: 1000,
            download_speed: 1000,

            upload_limit: 10,
            download_limit: 10,
            initial_slots: 2,

            worker_threads: 2,
            worker_batch: 10,
            main_threads: 5,

            repetition_threshold: 5,
            connection_stale: 2000,
            connection_cooldown: 10000,
            forger_timeout: 2000,
            forger_tryout: 5,
            suspicion_threshold: 5,

            transaction_height_cache: 5,

            retained_chunks: None,
        }
    }
}
