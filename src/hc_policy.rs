use rand::Rng;
use serde::Deserialize;

use crate::hc_blocks::Transaction;
use crate::hc_digest::sha256_hex;
use crate::hc_events::Event;
use crate::hc_interface::{NetworkPort, SimJob, SimTick};
use crate::hc_node::Node;
use crate::hc_outbound::TrackerTable;
use crate::hc_sales::{predictable_seed, SalesRecord, SalesStyle};
use crate::hc_signal::{NodeSignal, SignalKind};

// ============================================================================
// Extension Points
// ============================================================================

/// Variant-specific work done once per main-loop execution.
///
/// Returns the variant's own delay; the node divides it by its main-thread
/// count before adding its shared bookkeeping.
pub trait TickPolicy {
    fn name(&self) -> &'static str;

    fn on_tick(&mut self, node: &mut Node, tick: SimTick, port: &mut dyn NetworkPort) -> SimTick;
}

/// Last look at outbound jobs before the scheduler takes them.
pub trait OutboundMutator {
    fn mutate(&mut self, owner: &str, jobs: &mut Vec<SimJob>, trackers: &mut TrackerTable);
}

// ============================================================================
// Passive Variants
// ============================================================================

/// Only relays. Also the policy of delayed and deaf nodes.
pub struct ReadOnly;

impl TickPolicy for ReadOnly {
    fn name(&self) -> &'static str {
        "read"
    }

    fn on_tick(&mut self, _node: &mut Node, _tick: SimTick, _port: &mut dyn NetworkPort) -> SimTick {
        0
    }
}

/// Holds every outbound job back by a fixed number of ticks.
pub struct Delayed {
    pub extra_delay: SimTick,
}

impl Default for Delayed {
    fn default() -> Self {
        Self { extra_delay: 100 }
    }
}

impl OutboundMutator for Delayed {
    fn mutate(&mut self, _owner: &str, jobs: &mut Vec<SimJob>, _trackers: &mut TrackerTable) {
        for job in jobs.iter_mut() {
            job.deliver_at += self.extra_delay;
        }
    }
}

/// Never lets anything out.
pub struct Deaf;

impl OutboundMutator for Deaf {
    fn mutate(&mut self, _owner: &str, jobs: &mut Vec<SimJob>, _trackers: &mut TrackerTable) {
        jobs.clear();
    }
}

// ============================================================================
// Writers
// ============================================================================

/// Forges a block from the whole pool when its rotation slot comes up.
#[derive(Default)]
pub struct BlockWriter {
    /// The pool must hold more than this many transactions (default: 0)
    pub min_transactions: usize,
}

impl TickPolicy for BlockWriter {
    fn name(&self) -> &'static str {
        "block_writer"
    }

    fn on_tick(&mut self, node: &mut Node, tick: SimTick, port: &mut dyn NetworkPort) -> SimTick {
        let net = *port.config();
        if node.links().upload_count() == 0
            || !node.is_next_forger()
            || node.pool().len() <= self.min_transactions
        {
            return net.processing_delay;
        }

        if let Some(block) = node.draft_block(net.chunk_threshold) {
            let signal = NodeSignal::new_block(node.id().clone(), block.encode());
            node.process_signal(signal, tick, port);
        }
        net.block_delay
    }
}

/// Writer that forwards only the blocks it forged itself.
pub struct DropForeignBlocks;

impl OutboundMutator for DropForeignBlocks {
    fn mutate(&mut self, owner: &str, jobs: &mut Vec<SimJob>, trackers: &mut TrackerTable) {
        jobs.retain(|job| job.signal.kind != SignalKind::NewBlock || job.signal.origin == owner);
        trackers.retain(|_, tracker| tracker.signal().kind != SignalKind::NewBlock);
    }
}

/// Ways a malicious writer corrupts its block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlockFault {
    Regular,
    InvalidChunkHash,
    InvalidCreator,
    HeightBehind,
    HeightFarAhead,
}

impl BlockFault {
    pub const ALL: [BlockFault; 5] = [
        BlockFault::Regular,
        BlockFault::InvalidChunkHash,
        BlockFault::InvalidCreator,
        BlockFault::HeightBehind,
        BlockFault::HeightFarAhead,
    ];

    pub fn label(self) -> &'static str {
        match self {
            BlockFault::Regular => "Regular",
            BlockFault::InvalidChunkHash => "Invalid Hash chain",
            BlockFault::InvalidCreator => "Invalid creator",
            BlockFault::HeightBehind => "Invalid height",
            BlockFault::HeightFarAhead => "Invalid height -> too far in the future",
        }
    }
}

/// Relative weight of each fault, in `BlockFault::ALL` order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FaultWeights(pub [u32; 5]);

impl Default for FaultWeights {
    fn default() -> Self {
        Self([1; 5])
    }
}

impl FaultWeights {
    pub fn sample(&self, rng: &mut impl Rng) -> BlockFault {
        let total: u32 = self.0.iter().sum();
        if total == 0 {
            return BlockFault::Regular;
        }
        let mut roll = rng.gen_range(0..total);
        for (fault, weight) in BlockFault::ALL.iter().zip(self.0) {
            if roll < weight {
                return *fault;
            }
            roll -= weight;
        }
        BlockFault::Regular
    }
}

/// Writer that, in its rotation slot, picks a fault at random and broadcasts
/// the corrupted block without applying it locally.
#[derive(Default)]
pub struct MaliciousWriter {
    pub weights: FaultWeights,
}

impl TickPolicy for MaliciousWriter {
    fn name(&self) -> &'static str {
        "malicious_writer"
    }

    fn on_tick(&mut self, node: &mut Node, tick: SimTick, port: &mut dyn NetworkPort) -> SimTick {
        let net = *port.config();
        if node.links().upload_count() == 0 || !node.is_next_forger() {
            return net.processing_delay;
        }
        let Some(mut block) = node.draft_block(net.chunk_threshold) else {
            return net.processing_delay;
        };

        let fault = self.weights.sample(port.rng());
        port.log(tick, node.id(), Event::BlockCreated { fault: fault.label() });

        match fault {
            BlockFault::Regular => {
                let signal = NodeSignal::new_block(node.id().clone(), block.encode());
                node.process_signal(signal, tick, port);
                return net.block_delay;
            }
            BlockFault::InvalidChunkHash => {
                block.previous_chunk_hash = sha256_hex(node.chain().current_chunk_hash());
            }
            BlockFault::InvalidCreator => block.creator = "invalid_creator".to_string(),
            BlockFault::HeightBehind => block.height = block.height.saturating_sub(10),
            BlockFault::HeightFarAhead => block.height += 50,
        }

        node.publish(NodeSignal::new_block(node.id().clone(), block.encode()));
        net.block_delay
    }
}

// ============================================================================
// Transaction Generators
// ============================================================================

/// Emits one dummy transaction every `ticks_per_transaction` ticks.
pub struct TransactionGenerator {
    pub ticks_per_transaction: SimTick,
    next_batch: SimTick,
}

impl TransactionGenerator {
    /// `first_batch` staggers generators created one after another.
    pub fn new(ticks_per_transaction: SimTick, first_batch: SimTick) -> Self {
        Self {
            ticks_per_transaction: ticks_per_transaction.max(1),
            next_batch: first_batch,
        }
    }

    /// Predictable payload: the origin's string hash divided by the tick.
    pub fn dummy(origin: &str, tick: SimTick) -> Transaction {
        Transaction::new(origin, predictable_seed(origin, tick).to_string())
    }
}

impl TickPolicy for TransactionGenerator {
    fn name(&self) -> &'static str {
        "transaction"
    }

    fn on_tick(&mut self, node: &mut Node, tick: SimTick, port: &mut dyn NetworkPort) -> SimTick {
        let net = *port.config();
        if node.links().upload_count() == 0 {
            return net.processing_delay;
        }

        while self.next_batch <= tick {
            let tx = Self::dummy(node.id(), tick);
            let signal = NodeSignal::new_transaction(node.id().clone(), tx.encode());
            node.process_signal(signal, tick, port);
            self.next_batch += self.ticks_per_transaction;
        }
        net.processing_delay
    }
}

/// Emits an EET sales record with a fixed chance per execution.
pub struct SalesGenerator {
    pub chance: f64,
    pub style: SalesStyle,
}

impl Default for SalesGenerator {
    fn default() -> Self {
        Self {
            chance: 0.1,
            style: SalesStyle::Xml,
        }
    }
}

impl SalesGenerator {
    /// Chance per execution so that `total` generators together produce
    /// roughly `desired` transactions per thousand ticks.
    pub fn chance_for(total: u32, desired: u32) -> f64 {
        desired as f64 / total.max(1) as f64 / 1000.0
    }
}

impl TickPolicy for SalesGenerator {
    fn name(&self) -> &'static str {
        "sales_transaction"
    }

    fn on_tick(&mut self, node: &mut Node, tick: SimTick, port: &mut dyn NetworkPort) -> SimTick {
        let net = *port.config();
        if node.links().upload_count() == 0 {
            return net.processing_delay;
        }

        if port.rng().gen::<f64>() <= self.chance {
            let payload = SalesRecord::generate(node.id(), tick).render(self.style);
            let tx = Transaction::new(node.id().clone(), payload);
            let signal = NodeSignal::new_transaction(node.id().clone(), tx.encode());
            node.process_signal(signal, tick, port);
        }
        net.processing_delay
    }
}
