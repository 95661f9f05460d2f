use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;

use indexmap::IndexMap;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::hc_blocks::Block;
use crate::hc_config::NetworkConfig;
use crate::hc_events::{Event, EventSink, NoOpSink};
use crate::hc_interface::{DecodeError, LinkDirection, NetworkPort, NodeId, Permission, SimJob, SimTick};
use crate::hc_node::{Node, NodeStats};
use crate::hc_signal::NodeSignal;

/// Misuse of the scheduler API.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown node `{0}`")]
    UnknownNode(NodeId),

    #[error("node `{0}` already exists")]
    DuplicateNode(NodeId),

    #[error("node `{0}` cannot link to itself")]
    SelfLink(NodeId),

    #[error("invalid initial permissions: {0}")]
    Permissions(#[from] DecodeError),
}

/// Derive a 32-byte RNG seed from a human readable phrase.
pub fn seed_from_phrase(phrase: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(phrase.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Discrete-event scheduler owning every node.
///
/// Two queues drive the simulation: pending signal deliveries keyed by their
/// absolute delivery tick, and node executions keyed by the tick the node asked
/// to run again. Equal keys keep insertion order, so a run is a pure function
/// of its configuration and seed.
pub struct Network {
    config: NetworkConfig,
    tick: SimTick,

    nodes: IndexMap<NodeId, RefCell<Node>>,
    costs: IndexMap<NodeId, SimTick>,

    pending: BTreeMap<SimTick, Vec<SimJob>>,
    schedule: BTreeMap<SimTick, Vec<NodeId>>,

    initial_auths: IndexMap<NodeId, Permission>,
    seeded: bool,

    rng: StdRng,
    sink: Box<dyn EventSink>,
}

impl Network {
    pub fn new(config: NetworkConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub fn from_seed_bytes(config: NetworkConfig, seed: [u8; 32]) -> Self {
        Self::with_rng(config, StdRng::from_seed(seed))
    }

    fn with_rng(config: NetworkConfig, rng: StdRng) -> Self {
        Self {
            config,
            tick: 0,
            nodes: IndexMap::new(),
            costs: IndexMap::new(),
            pending: BTreeMap::new(),
            schedule: BTreeMap::new(),
            initial_auths: IndexMap::new(),
            seeded: false,
            rng,
            sink: Box::new(NoOpSink),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn set_tick(&mut self, tick: SimTick) {
        self.tick = tick;
    }

    // ===== Setup =====

    pub fn add_node(&mut self, node: Node) -> Result<(), SimError> {
        let tick = self.tick;
        self.add_node_at(node, tick)
    }

    /// Register a node whose first execution happens at `first_run`. Its
    /// connection cost is drawn from the seeded RNG.
    pub fn add_node_at(&mut self, node: Node, first_run: SimTick) -> Result<(), SimError> {
        let id = node.id().clone();
        if self.nodes.contains_key(&id) {
            return Err(SimError::DuplicateNode(id));
        }

        let span = self.config.connection_cost_span;
        let cost = if span == 0 {
            self.config.min_connection_cost
        } else {
            self.rng.gen_range(0..span) + self.config.min_connection_cost
        };
        debug!("node {} joins with connection cost {}", id, cost);

        self.costs.insert(id.clone(), cost);
        self.schedule.entry(first_run).or_default().push(id.clone());
        self.nodes.insert(id, RefCell::new(node));
        Ok(())
    }

    pub fn set_connection_cost(&mut self, id: &str, cost: SimTick) -> Result<(), SimError> {
        let slot = self
            .costs
            .get_mut(id)
            .ok_or_else(|| SimError::UnknownNode(id.to_string()))?;
        *slot = cost;
        Ok(())
    }

    pub fn connection_cost(&self, id: &str) -> SimTick {
        self.costs
            .get(id)
            .copied()
            .unwrap_or(self.config.default_connection_cost)
    }

    /// Mean of both nodes' costs.
    pub fn pair_delay(&self, a: &str, b: &str) -> SimTick {
        (self.connection_cost(a) + self.connection_cost(b)) / 2
    }

    pub fn add_initial_auth(&mut self, id: impl Into<NodeId>, level: Permission) {
        self.initial_auths.insert(id.into(), level);
        self.seeded = false;
    }

    /// Apply the synthetic genesis authorization block to every node.
    pub fn seed_permissions(&mut self) -> Result<(), SimError> {
        for cell in self.nodes.values() {
            cell.borrow_mut().seed_permissions(&self.initial_auths)?;
        }
        self.seeded = true;
        Ok(())
    }

    /// Explicit link between two registered nodes, bypassing slot limits.
    /// Without a delay the pair delay is used.
    pub fn connect(
        &mut self,
        from: &str,
        to: &str,
        direction: LinkDirection,
        delay: Option<SimTick>,
    ) -> Result<(), SimError> {
        if from == to {
            return Err(SimError::SelfLink(from.to_string()));
        }
        let first = self
            .nodes
            .get(from)
            .ok_or_else(|| SimError::UnknownNode(from.to_string()))?;
        let second = self
            .nodes
            .get(to)
            .ok_or_else(|| SimError::UnknownNode(to.to_string()))?;

        let delay = delay.unwrap_or_else(|| self.pair_delay(from, to));
        let tick = self.tick;
        let mut first = first.borrow_mut();
        let mut second = second.borrow_mut();

        if matches!(direction, LinkDirection::Upload | LinkDirection::Both) {
            first.connect_upload(to, delay, tick);
            second.connect_download(from, delay, tick);
        }
        if matches!(direction, LinkDirection::Download | LinkDirection::Both) {
            first.connect_download(to, delay, tick);
            second.connect_upload(from, delay, tick);
        }
        Ok(())
    }

    /// Queue a signal for delivery at the current tick.
    pub fn inject(&mut self, signal: NodeSignal, target: &str) -> Result<(), SimError> {
        if !self.nodes.contains_key(target) {
            return Err(SimError::UnknownNode(target.to_string()));
        }
        self.pending.entry(self.tick).or_default().push(SimJob {
            signal,
            target: target.to_string(),
            deliver_at: self.tick,
        });
        Ok(())
    }

    // ===== Simulation =====

    /// One step: deliver due signals, run due nodes, requeue, move the clock.
    pub fn advance(&mut self) {
        if !self.seeded {
            if let Err(e) = self.seed_permissions() {
                warn!("starting without initial permissions: {}", e);
                self.seeded = true;
            }
        }

        let now = self.tick;
        self.deliver_due(now);

        let due: Vec<SimTick> = self.schedule.range(..=now).map(|(at, _)| *at).collect();
        for at in due {
            if let Some(ids) = self.schedule.remove(&at) {
                for id in ids {
                    self.execute(id);
                }
            }
        }

        // zero-delay sends from the nodes that just ran land in this step
        self.deliver_due(now);

        let next = self
            .schedule
            .keys()
            .next()
            .into_iter()
            .chain(self.pending.keys().next())
            .min()
            .copied();
        self.tick = next.map_or(now + 1, |at| at.max(now + 1));
    }

    pub fn run_until(&mut self, end: SimTick) {
        while self.tick < end {
            self.advance();
        }
    }

    /// Deliver everything due at or before `now`, including jobs the
    /// deliveries themselves make due.
    fn deliver_due(&mut self, now: SimTick) {
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() > now {
                break;
            }
            for job in entry.remove() {
                self.deliver(job);
            }
        }
    }

    fn deliver(&mut self, job: SimJob) {
        let Some(cell) = self.nodes.get(&job.target) else {
            warn!("dropping signal for unknown node {}", job.target);
            return;
        };
        let jobs = {
            let mut node = cell.borrow_mut();
            let mut port = Dispatch {
                tick: self.tick,
                config: &self.config,
                nodes: &self.nodes,
                costs: &self.costs,
                default_cost: self.config.default_connection_cost,
                rng: &mut self.rng,
                sink: self.sink.as_mut(),
            };
            node.deliver(job.signal, &mut port);
            node.drain_outbox()
        };
        self.enqueue(jobs);
    }

    fn enqueue(&mut self, jobs: Vec<SimJob>) {
        for job in jobs {
            self.pending.entry(job.deliver_at).or_default().push(job);
        }
    }

    fn execute(&mut self, id: NodeId) {
        let Some(cell) = self.nodes.get(&id) else {
            return;
        };
        let (delay, jobs) = {
            let mut node = cell.borrow_mut();
            let mut port = Dispatch {
                tick: self.tick,
                config: &self.config,
                nodes: &self.nodes,
                costs: &self.costs,
                default_cost: self.config.default_connection_cost,
                rng: &mut self.rng,
                sink: self.sink.as_mut(),
            };
            let delay = node.execute(&mut port);
            (delay, node.drain_outbox())
        };

        self.enqueue(jobs);
        self.schedule.entry(self.tick + delay).or_default().push(id);
    }

    // ===== Inspection =====

    pub fn tick(&self) -> SimTick {
        self.tick
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn node(&self, id: &str) -> Option<Ref<'_, Node>> {
        self.nodes.get(id).map(RefCell::borrow)
    }

    pub fn node_mut(&self, id: &str) -> Option<RefMut<'_, Node>> {
        self.nodes.get(id).map(RefCell::borrow_mut)
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn sink_mut(&mut self) -> &mut dyn EventSink {
        self.sink.as_mut()
    }

    /// Counters of every node in registration order.
    pub fn snapshot(&self) -> Vec<NodeStats> {
        self.nodes.values().map(|cell| cell.borrow().stats()).collect()
    }

    /// Blocks of the highest chain, genesis side first. The first node wins ties.
    pub fn longest_chain_blocks(&self) -> Vec<Block> {
        let mut best: Option<Ref<'_, Node>> = None;
        for cell in self.nodes.values() {
            let node = cell.borrow();
            if best
                .as_ref()
                .map_or(true, |b| node.chain().height() > b.chain().height())
            {
                best = Some(node);
            }
        }

        best.map(|node| {
            let mut blocks: Vec<Block> = node.chain().history().into_iter().cloned().collect();
            blocks.reverse();
            blocks
        })
        .unwrap_or_default()
    }
}

// ===== Node Port =====

/// What one node sees of the network while it is being delivered to or run.
struct Dispatch<'a> {
    tick: SimTick,
    config: &'a NetworkConfig,
    nodes: &'a IndexMap<NodeId, RefCell<Node>>,
    costs: &'a IndexMap<NodeId, SimTick>,
    default_cost: SimTick,
    rng: &'a mut StdRng,
    sink: &'a mut dyn EventSink,
}

impl Dispatch<'_> {
    fn shuffled_candidates(&mut self, caller: &str) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().filter(|id| *id != caller).cloned().collect();
        ids.shuffle(&mut *self.rng);
        ids
    }
}

impl NetworkPort for Dispatch<'_> {
    fn current_tick(&self) -> SimTick {
        self.tick
    }

    fn config(&self) -> &NetworkConfig {
        self.config
    }

    fn pair_delay(&self, a: &str, b: &str) -> SimTick {
        let cost = |id: &str| self.costs.get(id).copied().unwrap_or(self.default_cost);
        (cost(a) + cost(b)) / 2
    }

    fn request_upload(&mut self, caller: &str) -> Option<(NodeId, SimTick)> {
        let nodes = self.nodes;
        for id in self.shuffled_candidates(caller) {
            let delay = self.pair_delay(caller, &id);
            let Some(Ok(mut target)) = nodes.get(&id).map(RefCell::try_borrow_mut) else {
                continue;
            };
            if target.admit_download(caller, delay, self) {
                return Some((id, delay));
            }
        }
        None
    }

    fn request_download(&mut self, caller: &str) -> Option<(NodeId, SimTick)> {
        let nodes = self.nodes;
        for id in self.shuffled_candidates(caller) {
            let delay = self.pair_delay(caller, &id);
            let Some(Ok(mut target)) = nodes.get(&id).map(RefCell::try_borrow_mut) else {
                continue;
            };
            if target.admit_upload(caller, delay, self) {
                return Some((id, delay));
            }
        }
        None
    }

    fn close_upload(&mut self, caller: &str, target: &str) -> bool {
        let nodes = self.nodes;
        match nodes.get(target).map(RefCell::try_borrow_mut) {
            Some(Ok(mut node)) => node.close_download_from(caller, self),
            _ => false,
        }
    }

    fn close_download(&mut self, caller: &str, target: &str) -> bool {
        let nodes = self.nodes;
        match nodes.get(target).map(RefCell::try_borrow_mut) {
            Some(Ok(mut node)) => node.close_upload_to(caller, self),
            _ => false,
        }
    }

    fn rng(&mut self) -> &mut StdRng {
        &mut *self.rng
    }

    fn log(&mut self, tick: SimTick, origin: &str, event: Event) {
        self.sink.log(tick, origin, event);
    }
}
