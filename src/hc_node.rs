use std::collections::{BTreeMap, VecDeque};

use hashbrown::HashMap;
use indexmap::{IndexMap, IndexSet};
use log::{debug, trace, warn};

use crate::hc_auth_chain::AuthorizationChain;
use crate::hc_blocks::{Block, Transaction};
use crate::hc_chain::{Chain, Lookup};
use crate::hc_config::NodeConfig;
use crate::hc_events::{render_seen, Event, LinkSide};
use crate::hc_interface::{
    DecodeError, Digest, NetworkPort, NodeId, Permission, SimJob, SimTick,
};
use crate::hc_outbound::{OutboundSignalTracker, TrackerTable};
use crate::hc_peers::PeerLinks;
use crate::hc_policy::{OutboundMutator, TickPolicy};
use crate::hc_signal::{NodeSignal, SignalCounters, SignalKind};

/// Read-only counters polled by statistics and charting collaborators.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeStats {
    pub id: NodeId,
    pub policy: &'static str,
    pub permission: Option<Permission>,
    pub height: u64,
    pub pool_size: usize,
    pub tracked_signals: usize,
    pub waiting_signals: usize,
    pub waiting_blocks: usize,
    pub uploads: usize,
    pub downloads: usize,
    pub accepted_transactions: u64,
    pub evicted_transactions: u64,
    pub sent: SignalCounters,
    pub received: SignalCounters,
    pub upload_utilization: u64,
    pub download_utilization: u64,
}

/// One peer of the simulated network.
///
/// A node only reacts to two calls from the scheduler: `deliver` for an
/// incoming signal and `execute` for its own main loop. Everything it wants to
/// send piles up in the outbox until the scheduler drains it.
pub struct Node {
    id: NodeId,
    config: NodeConfig,

    pool: IndexMap<Digest, Transaction>,
    chain: Chain,
    auth: AuthorizationChain,
    links: PeerLinks,

    waiting_signals: VecDeque<NodeSignal>,
    waiting_blocks: IndexMap<Digest, Block>,
    trackers: TrackerTable,
    outbox: Vec<SimJob>,

    // chain height -> transaction hashes leaving the dedup window there
    clear_at: BTreeMap<u64, IndexSet<Digest>>,
    worker_free_at: Vec<SimTick>,
    next_heartbeat: SimTick,

    active_delays: HashMap<NodeId, SimTick>,
    active_forwarded_at: HashMap<NodeId, SimTick>,
    suspicion: HashMap<NodeId, u32>,
    forger_timeouts: u32,

    accepted_transactions: u64,
    evicted_transactions: u64,
    sent: SignalCounters,
    received: SignalCounters,

    policy: Option<Box<dyn TickPolicy>>,
    mutator: Option<Box<dyn OutboundMutator>>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, config: NodeConfig) -> Self {
        let workers = config.worker_threads.max(1);
        Self {
            id: id.into(),
            links: PeerLinks::new(config.initial_slots),
            config,
            pool: IndexMap::new(),
            chain: Chain::new(),
            auth: AuthorizationChain::new(),
            waiting_signals: VecDeque::new(),
            waiting_blocks: IndexMap::new(),
            trackers: TrackerTable::new(),
            outbox: Vec::new(),
            clear_at: BTreeMap::new(),
            worker_free_at: vec![0; workers],
            next_heartbeat: 0,
            active_delays: HashMap::new(),
            active_forwarded_at: HashMap::new(),
            suspicion: HashMap::new(),
            forger_timeouts: 0,
            accepted_transactions: 0,
            evicted_transactions: 0,
            sent: SignalCounters::default(),
            received: SignalCounters::default(),
            policy: None,
            mutator: None,
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn TickPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_mutator(mut self, mutator: Box<dyn OutboundMutator>) -> Self {
        self.mutator = Some(mutator);
        self
    }

    // ===== Configuration =====

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut NodeConfig {
        &mut self.config
    }

    pub fn set_upload_speed(&mut self, speed: u64) {
        self.config.upload_speed = speed;
    }

    pub fn set_download_speed(&mut self, speed: u64) {
        self.config.download_speed = speed;
    }

    pub fn set_upload_limit(&mut self, limit: usize) {
        self.config.upload_limit = limit;
    }

    pub fn set_download_limit(&mut self, limit: usize) {
        self.config.download_limit = limit;
    }

    pub fn set_connection_cooldown(&mut self, ticks: SimTick) {
        self.config.connection_cooldown = ticks;
    }

    pub fn set_connection_stale(&mut self, ticks: SimTick) {
        self.config.connection_stale = ticks;
    }

    pub fn set_repetition_threshold(&mut self, resends: u32) {
        self.config.repetition_threshold = resends;
    }

    /// Genesis authorization block, applied before the first tick.
    pub fn seed_permissions(&mut self, grants: &IndexMap<NodeId, Permission>) -> Result<(), DecodeError> {
        self.auth.seed(grants)
    }

    // ===== Accessors =====

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn auth(&self) -> &AuthorizationChain {
        &self.auth
    }

    pub fn links(&self) -> &PeerLinks {
        &self.links
    }

    pub fn pool(&self) -> &IndexMap<Digest, Transaction> {
        &self.pool
    }

    pub fn trackers(&self) -> &TrackerTable {
        &self.trackers
    }

    pub fn waiting_blocks(&self) -> &IndexMap<Digest, Block> {
        &self.waiting_blocks
    }

    pub fn outbox(&self) -> &[SimJob] {
        &self.outbox
    }

    pub fn suspicion(&self, id: &str) -> u32 {
        self.suspicion.get(id).copied().unwrap_or(0)
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.as_ref().map_or("plain", |p| p.name())
    }

    pub fn is_next_forger(&self) -> bool {
        self.auth.next_creator() == Some(&self.id)
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            id: self.id.clone(),
            policy: self.policy_name(),
            permission: self.auth.permission(&self.id),
            height: self.chain.height(),
            pool_size: self.pool.len(),
            tracked_signals: self.trackers.len(),
            waiting_signals: self.waiting_signals.len(),
            waiting_blocks: self.waiting_blocks.len(),
            uploads: self.links.upload_count(),
            downloads: self.links.download_count(),
            accepted_transactions: self.accepted_transactions,
            evicted_transactions: self.evicted_transactions,
            sent: self.sent,
            received: self.received,
            upload_utilization: self.links.upload_utilization(),
            download_utilization: self.links.download_utilization(),
        }
    }

    // ===== Links =====

    /// Explicit topology: this node uploads to `peer`.
    pub fn connect_upload(&mut self, peer: &str, delay: SimTick, tick: SimTick) {
        self.links.insert_upload(peer, delay, tick);
    }

    /// Explicit topology: this node downloads from `peer`.
    pub fn connect_download(&mut self, peer: &str, delay: SimTick, tick: SimTick) {
        self.links.insert_download(peer, delay, tick);
    }

    /// `caller` wants to download from this node.
    pub fn admit_upload(&mut self, caller: &str, delay: SimTick, port: &mut dyn NetworkPort) -> bool {
        let tick = port.current_tick();
        if !self.links.admit_upload(caller, delay, tick) {
            return false;
        }
        port.log(
            tick,
            &self.id,
            Event::LinkOpened {
                peer: caller.to_string(),
                side: LinkSide::Upload,
                delay,
            },
        );
        true
    }

    /// `caller` wants to upload to this node.
    pub fn admit_download(&mut self, caller: &str, delay: SimTick, port: &mut dyn NetworkPort) -> bool {
        let tick = port.current_tick();
        if !self.links.admit_download(caller, delay, tick) {
            return false;
        }
        port.log(
            tick,
            &self.id,
            Event::LinkOpened {
                peer: caller.to_string(),
                side: LinkSide::Download,
                delay,
            },
        );
        true
    }

    pub fn close_download_from(&mut self, source: &str, port: &mut dyn NetworkPort) -> bool {
        if !self.links.remove_download(source) {
            return false;
        }
        let tick = port.current_tick();
        self.forget_target(source);
        self.links.cool_down(source, tick + self.config.connection_cooldown);
        port.log(
            tick,
            &self.id,
            Event::LinkClosed {
                peer: source.to_string(),
                side: LinkSide::Download,
            },
        );
        true
    }

    pub fn close_upload_to(&mut self, target: &str, port: &mut dyn NetworkPort) -> bool {
        if !self.links.remove_upload(target) {
            return false;
        }
        let tick = port.current_tick();
        self.forget_target(target);
        self.links.cool_down(target, tick + self.config.connection_cooldown);
        port.log(
            tick,
            &self.id,
            Event::LinkClosed {
                peer: target.to_string(),
                side: LinkSide::Upload,
            },
        );
        true
    }

    fn forget_target(&mut self, peer: &str) {
        for tracker in self.trackers.values_mut() {
            tracker.mark_final(peer);
        }
    }

    // ===== Scheduler Entry Points =====

    /// Queue an incoming signal in front and let idle workers pick it up.
    pub fn deliver(&mut self, signal: NodeSignal, port: &mut dyn NetworkPort) {
        self.waiting_signals.push_front(signal);
        self.run_workers(port.current_tick(), port);
    }

    /// Main loop. Returns the delay until the next invocation, at least 1.
    pub fn execute(&mut self, port: &mut dyn NetworkPort) -> SimTick {
        let tick = port.current_tick();
        let net = *port.config();

        self.run_workers(tick, port);

        let mut delay = self.run_policy(tick, port) / self.config.main_threads.max(1);

        self.resend_tracked(tick + delay, port);

        if self.waiting_signals.is_empty() {
            delay += net.empty_queue_delay;
        }

        self.skip_suspicious_forger(tick, port);
        self.check_forger_timeout(tick, delay, port);
        self.retry_waiting_blocks(tick, delay, port);
        self.heartbeat(tick, delay, port);
        self.release_trackers(tick, port);

        if self.links.last_check() + net.connection_check_interval <= tick {
            self.refresh_connections(tick, port);
        }

        delay.max(1)
    }

    /// Hand the outbox to the scheduler, after the mutator had its say.
    pub fn drain_outbox(&mut self) -> Vec<SimJob> {
        let mut jobs = std::mem::take(&mut self.outbox);
        if let Some(mut mutator) = self.mutator.take() {
            mutator.mutate(&self.id, &mut jobs, &mut self.trackers);
            self.mutator = Some(mutator);
        }
        jobs
    }

    fn run_policy(&mut self, tick: SimTick, port: &mut dyn NetworkPort) -> SimTick {
        let Some(mut policy) = self.policy.take() else {
            return 0;
        };
        let delay = policy.on_tick(self, tick, port);
        self.policy = Some(policy);
        delay
    }

    /// Each idle worker takes up to `worker_batch` signals and stays busy for
    /// the longest processing delay among them.
    fn run_workers(&mut self, tick: SimTick, port: &mut dyn NetworkPort) {
        for slot in 0..self.worker_free_at.len() {
            if self.worker_free_at[slot] <= tick {
                let mut busy_for = 0;
                for _ in 0..self.config.worker_batch {
                    let Some(signal) = self.waiting_signals.pop_front() else {
                        break;
                    };
                    self.links.record_received(signal.wire_len());
                    busy_for = busy_for.max(self.process_signal(signal, tick, port));
                }
                self.worker_free_at[slot] = tick + busy_for;
            }

            if self.waiting_signals.is_empty() {
                return;
            }
        }
    }

    // ===== Signal Processing =====

    /// Handle one signal and return its processing delay.
    pub fn process_signal(&mut self, signal: NodeSignal, tick: SimTick, port: &mut dyn NetworkPort) -> SimTick {
        let net = *port.config();
        let from_self = signal.forward_origin == self.id;

        if !from_self {
            if signal.kind.requires_ack() {
                if matches!(signal.kind, SignalKind::NewTransaction | SignalKind::NewBlock) {
                    port.log(
                        tick,
                        &self.id,
                        Event::AckQueued {
                            kind: signal.kind,
                            hash: signal.hash(),
                        },
                    );
                }
                let ack = NodeSignal::ack(self.id.clone(), &signal);
                let relay = signal.forward_origin.clone();
                self.send(&relay, ack, tick, port);
            }

            self.received.bump(signal.kind);
            port.log(
                tick,
                &signal.forward_origin,
                Event::SignalReceived {
                    target: self.id.clone(),
                    kind: signal.kind,
                    hash: signal.hash(),
                    payload: signal.payload.clone(),
                },
            );
        }

        match signal.kind {
            SignalKind::Ack => {
                self.on_ack(&signal);
                net.processing_delay
            }
            SignalKind::Active => {
                self.on_active(&signal, tick, port);
                net.processing_delay
            }
            SignalKind::NewTransaction => {
                self.on_new_transaction(&signal, tick, port);
                net.transaction_delay
            }
            SignalKind::NewBlock => {
                if self.on_new_block(&signal, tick, port) {
                    net.block_delay
                } else {
                    net.processing_delay
                }
            }
            SignalKind::NewAuthBlock => {
                self.on_new_auth_block(&signal, tick, port);
                net.processing_delay
            }
            SignalKind::BlockRequest => {
                self.on_block_request(&signal, tick, port);
                net.processing_delay
            }
            SignalKind::BlockChunkRequest | SignalKind::AuthBlockRequest => {
                // no response type exists for these
                let deny = NodeSignal::deny(self.id.clone(), signal.hash());
                self.send(&signal.origin, deny, tick, port);
                net.processing_delay
            }
            SignalKind::BlockResponse => {
                self.on_block_response(&signal, tick, port);
                net.processing_delay
            }
            SignalKind::RequestDeny => {
                if let Some(tracker) = self.tracker_for(&signal) {
                    tracker.mark_final(&signal.origin);
                }
                net.processing_delay
            }
            SignalKind::RequestWait => {
                if let Some(tracker) = self.tracker_for(&signal) {
                    tracker.mark_wait(&signal.origin, tick);
                }
                net.processing_delay
            }
        }
    }

    fn tracker_for(&mut self, response: &NodeSignal) -> Option<&mut OutboundSignalTracker> {
        response
            .payload
            .as_deref()
            .and_then(|hash| self.trackers.get_mut(hash))
    }

    fn on_ack(&mut self, signal: &NodeSignal) {
        // drained trackers are released by the main loop
        if let Some(tracker) = self.tracker_for(signal) {
            tracker.mark_final(&signal.origin);
        }
    }

    fn on_active(&mut self, signal: &NodeSignal, tick: SimTick, port: &mut dyn NetworkPort) {
        let origin = &signal.origin;
        let last = self.links.last_seen(origin).unwrap_or(0);
        if last >= tick || *origin == self.id {
            trace!("{} ignores stale ACTIVE from {} ({} >= {})", self.id, origin, last, tick);
            return;
        }
        self.links.mark_seen(origin, tick);

        if self.auth.has_permission(origin, Permission::Write) {
            if let Some(delay) = signal.payload.as_deref().and_then(|p| p.parse().ok()) {
                self.active_delays.insert(origin.clone(), delay);
            }

            let forwarded = self.active_forwarded_at.get(origin).copied().unwrap_or(0);
            if forwarded + port.config().active_interval < tick {
                let payload = self.active_delays.get(origin).map(|d| d.to_string());
                let relay = NodeSignal::active(origin.clone(), payload);
                self.track_to_uploads(relay, &signal.forward_origin);
                self.active_forwarded_at.insert(origin.clone(), tick);
            }
        }

        let seen = render_seen(self.links.seen_table());
        port.log(tick, &self.id, Event::PeerKnowledge { seen });
    }

    fn on_new_transaction(&mut self, signal: &NodeSignal, tick: SimTick, port: &mut dyn NetworkPort) {
        let Some(payload) = signal.payload.as_deref() else {
            self.decode_failed(signal, DecodeError::MissingField("payload"), tick, port);
            return;
        };
        let tx = match Transaction::decode(payload) {
            Ok(tx) => tx,
            Err(e) => {
                self.decode_failed(signal, e, tick, port);
                return;
            }
        };

        if !self.auth.has_permission(&signal.origin, Permission::Publish) {
            return;
        }
        let tx_hash = tx.hash();
        if self.seen_transaction(&signal.hash(), &tx_hash) {
            return;
        }

        self.pool.insert(tx_hash.clone(), tx);
        port.log(tick, &self.id, Event::PoolSize { size: self.pool.len() });

        let relay = NodeSignal::new_transaction(signal.origin.clone(), payload);
        self.track_to_uploads(relay, &signal.forward_origin);

        let expire_at = self.chain.height() + self.config.transaction_height_cache;
        self.clear_at.entry(expire_at).or_default().insert(tx_hash);
    }

    /// Already being relayed, or inside the window of recently folded hashes.
    pub fn seen_transaction(&self, signal_hash: &str, tx_hash: &str) -> bool {
        self.trackers.contains_key(signal_hash)
            || self.clear_at.values().any(|hashes| hashes.contains(tx_hash))
    }

    fn on_new_block(&mut self, signal: &NodeSignal, tick: SimTick, port: &mut dyn NetworkPort) -> bool {
        let Some(payload) = signal.payload.as_deref() else {
            self.decode_failed(signal, DecodeError::MissingField("payload"), tick, port);
            return false;
        };
        let block = match Block::decode(payload) {
            Ok(block) => block,
            Err(e) => {
                self.decode_failed(signal, e, tick, port);
                return false;
            }
        };

        if !self.auth.has_permission(&signal.origin, Permission::Write)
            || !self.auth.has_permission(&block.creator, Permission::Write)
        {
            debug!("{} drops block from unauthorised {}", self.id, signal.origin);
            return false;
        }

        if !self.accept_block(block, tick, port) {
            return false;
        }

        let relay = NodeSignal::new_block(signal.origin.clone(), payload);
        self.track_to_uploads(relay, &signal.forward_origin);
        self.head_advanced(tick, port);
        true
    }

    fn on_new_auth_block(&mut self, signal: &NodeSignal, tick: SimTick, port: &mut dyn NetworkPort) {
        if self.trackers.contains_key(&signal.hash()) {
            return;
        }
        let Some(payload) = signal.payload.as_deref() else {
            self.decode_failed(signal, DecodeError::MissingField("payload"), tick, port);
            return;
        };
        let block = match Block::decode(payload) {
            Ok(block) => block,
            Err(e) => {
                self.decode_failed(signal, e, tick, port);
                return;
            }
        };

        if !self.auth.has_permission(&signal.origin, Permission::WriteAuth)
            || !self.auth.has_permission(&block.creator, Permission::WriteAuth)
            || !self.auth.is_next_auth_creator(&signal.origin)
        {
            return;
        }

        let creator = block.creator.clone();
        match self.auth.accept(block) {
            Ok(true) => {}
            Ok(false) => {
                trace!("{} already holds auth block from {}", self.id, creator);
                return;
            }
            Err(e) => {
                self.decode_failed(signal, e, tick, port);
                return;
            }
        }
        port.log(
            tick,
            &self.id,
            Event::AuthBlockAccepted {
                creator,
                height: self.auth.chain().height(),
            },
        );

        let relay = NodeSignal::new_auth_block(signal.origin.clone(), payload);
        self.track_to_uploads(relay, &signal.forward_origin);
    }

    fn on_block_request(&mut self, signal: &NodeSignal, tick: SimTick, port: &mut dyn NetworkPort) {
        let caller = signal.origin.clone();
        let request_hash = signal.hash();

        let wanted = match signal.payload.as_deref() {
            Some(wanted) if self.auth.has_permission(&caller, Permission::Read) => wanted,
            _ => {
                let deny = NodeSignal::deny(self.id.clone(), request_hash);
                self.send(&caller, deny, tick, port);
                return;
            }
        };

        let (found, unfetched) = match self.chain.find_by_previous(wanted) {
            Lookup::Found(block) => (Some(block.encode()), false),
            Lookup::Unfetched => (None, true),
            Lookup::Missing => (None, false),
        };

        let reply = match found {
            Some(encoded) => NodeSignal::block_response(self.id.clone(), encoded),
            None if unfetched => {
                let upstream = NodeSignal::block_request(caller.clone(), wanted);
                self.track_to_uploads(upstream, &signal.forward_origin);
                NodeSignal::wait(self.id.clone(), request_hash)
            }
            None => NodeSignal::deny(self.id.clone(), request_hash),
        };
        self.send(&caller, reply, tick, port);
    }

    fn on_block_response(&mut self, signal: &NodeSignal, tick: SimTick, port: &mut dyn NetworkPort) {
        let Some(payload) = signal.payload.as_deref() else {
            return;
        };
        let block = match Block::decode(payload) {
            Ok(block) => block,
            Err(e) => {
                self.decode_failed(signal, e, tick, port);
                return;
            }
        };

        for tracker in self.trackers.values_mut() {
            let answered = tracker.signal().kind == SignalKind::BlockRequest
                && tracker.signal().payload.as_deref() == Some(block.previous_hash.as_str());
            if answered {
                tracker.mark_final(&signal.origin);
            }
        }

        if self.accept_block(block, tick, port) {
            self.head_advanced(tick, port);
        }
    }

    fn decode_failed(&mut self, signal: &NodeSignal, error: DecodeError, tick: SimTick, port: &mut dyn NetworkPort) {
        warn!("{} dropped malformed {} from {}: {}", self.id, signal.kind, signal.origin, error);
        port.log(
            tick,
            &self.id,
            Event::DecodeFailed {
                kind: signal.kind,
                reason: error.to_string(),
            },
        );
    }

    // ===== Block Acceptance =====

    /// Accept `block` on top of the local chain if its creator holds the
    /// current forging slot and it links to the head. Anything else that is
    /// newer than the head waits in `waiting_blocks`.
    pub fn accept_block(&mut self, block: Block, tick: SimTick, port: &mut dyn NetworkPort) -> bool {
        let net = *port.config();
        let height = self.chain.height();
        if block.height <= height {
            return false;
        }

        let intact = block.previous_hash == self.chain.current_hash() && block.height == height + 1;
        let creator = block.creator.clone();
        let hash = block.hash();
        let first_sight = !self.waiting_blocks.contains_key(&hash);

        if self.auth.is_next_creator(&creator) {
            if !intact {
                self.waiting_blocks.insert(hash, block);
                return false;
            }

            self.drop_forks(&block.previous_hash);
            let block_height = block.height;
            let encoded = block.encode();
            self.include_block(block, tick, port);
            port.log(
                tick,
                &self.id,
                Event::BlockAccepted {
                    creator,
                    height: block_height,
                    chain_height: self.chain.height(),
                    encoded,
                },
            );
            return true;
        }

        if intact {
            if first_sight {
                port.log(
                    tick,
                    &self.id,
                    Event::BlockOutOfTurn {
                        creator: creator.clone(),
                        height: block.height,
                    },
                );
                *self.suspicion.entry(creator).or_insert(0) += 1;
            }
        } else if self.auth.is_future_block(&creator, net.future_block_window)
            && !self.chain.is_suspicious_future(block.height, net.suspicious_height_gap)
        {
            if first_sight {
                port.log(
                    tick,
                    &self.id,
                    Event::FutureBlock {
                        creator,
                        height: block.height,
                    },
                );
            }
        } else if first_sight {
            debug!("{} holds implausible block {} from {}", self.id, block.height, creator);
        }

        self.waiting_blocks.insert(hash, block);
        false
    }

    fn head_advanced(&mut self, tick: SimTick, port: &mut dyn NetworkPort) {
        port.log(tick, &self.id, Event::ChainHeight { height: self.chain.height() });
        self.chain.set_last_received(tick);
    }

    fn drop_forks(&mut self, previous_hash: &str) {
        self.waiting_blocks
            .retain(|_, waiting| waiting.previous_hash != previous_hash);
    }

    fn include_block(&mut self, block: Block, tick: SimTick, port: &mut dyn NetworkPort) {
        let mut included = IndexSet::new();
        for tx in block.transactions() {
            match tx {
                Ok(tx) => {
                    let tx_hash = tx.hash();
                    self.pool.shift_remove(&tx_hash);
                    included.insert(tx_hash);
                    self.accepted_transactions += 1;
                }
                Err(e) => warn!("{} skips malformed transaction in block: {}", self.id, e),
            }
        }

        self.chain.append(block);
        let height = self.chain.height();
        self.clear_at
            .entry(height + self.config.transaction_height_cache)
            .or_default()
            .extend(included);

        let still_open = self.clear_at.split_off(&(height + 1));
        let expired = std::mem::replace(&mut self.clear_at, still_open);
        let mut evicted = 0;
        for tx_hash in expired.into_values().flatten() {
            if self.pool.shift_remove(&tx_hash).is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.evicted_transactions += evicted as u64;
            port.log(tick, &self.id, Event::PoolEvicted { count: evicted });
        }

        self.auth.shift_forger();
        self.forger_timeouts = 0;
    }

    /// Build the next block from the whole pool, folding a chunk first when
    /// enough blocks accumulated. `None` with an empty pool.
    pub fn draft_block(&mut self, chunk_threshold: u64) -> Option<Block> {
        if self.pool.is_empty() {
            return None;
        }
        if self.chain.should_fold(chunk_threshold) {
            self.chain.fold_chunk();
            if let Some(keep) = self.config.retained_chunks {
                let pruned = self.chain.prune_folded(keep);
                debug!("{} pruned {} folded block bodies", self.id, pruned);
            }
        }

        let mut block = Block::from_transactions(self.id.clone(), self.pool.values());
        block.previous_hash = self.chain.current_hash().to_string();
        block.previous_chunk_hash = self.chain.current_chunk_hash().to_string();
        block.height = self.chain.height() + 1;
        Some(block)
    }

    // ===== Main Loop Steps =====

    fn skip_suspicious_forger(&mut self, tick: SimTick, port: &mut dyn NetworkPort) {
        let Some(next) = self.auth.next_creator().cloned() else {
            return;
        };
        if self.suspicion(&next) < self.config.suspicion_threshold {
            return;
        }
        self.suspicion.insert(next, 0);
        self.auth.shift_forger();
        port.log(
            tick,
            &self.id,
            Event::ForgerShifted {
                next: self.auth.next_creator().cloned(),
            },
        );
    }

    fn check_forger_timeout(&mut self, tick: SimTick, delay: SimTick, port: &mut dyn NetworkPort) {
        if self.links.download_count() == 0 || self.pool.is_empty() {
            return;
        }
        if self.chain.last_received() + self.config.forger_timeout >= tick {
            return;
        }

        let request = NodeSignal::block_request(self.id.clone(), self.chain.current_hash());
        self.send_to_uploads(request, tick + delay, port);
        self.chain.set_last_received(tick);
        self.forger_timeouts += 1;

        if self.forger_timeouts > self.config.forger_tryout {
            if let Some(next) = self.auth.next_creator().cloned() {
                *self.suspicion.entry(next).or_insert(0) += 1;
            }
            self.auth.shift_forger();
            self.forger_timeouts = 0;
            port.log(tick, &self.id, Event::ForgerShifted { next: None });
        }
    }

    fn retry_waiting_blocks(&mut self, tick: SimTick, delay: SimTick, port: &mut dyn NetworkPort) {
        let hashes: Vec<Digest> = self.waiting_blocks.keys().cloned().collect();
        for hash in hashes {
            let Some(block) = self.waiting_blocks.get(&hash) else {
                continue;
            };
            if block.height <= self.chain.height() {
                self.waiting_blocks.shift_remove(&hash);
                continue;
            }

            let block = block.clone();
            if !self.accept_block(block, tick, port) {
                continue;
            }
            self.head_advanced(tick, port);
            let relay = self
                .chain
                .current_block()
                .map(|head| NodeSignal::new_block(head.creator.clone(), head.encode()).relayed_by(self.id.clone()));
            if let Some(relay) = relay {
                self.send_to_uploads(relay, tick + delay, port);
            }
        }
    }

    fn heartbeat(&mut self, tick: SimTick, delay: SimTick, port: &mut dyn NetworkPort) {
        if self.next_heartbeat > tick {
            return;
        }
        let payload = self
            .auth
            .has_permission(&self.id, Permission::Write)
            .then(|| delay.to_string());
        let me = self.id.clone();
        let targets = self.links.connected();
        self.track(NodeSignal::active(me.clone(), payload), &me, targets.iter());
        self.next_heartbeat = tick + port.config().active_interval;
    }

    /// Drop trackers nobody waits on any more. Targets that stalled lose their
    /// links and go on cooldown.
    fn release_trackers(&mut self, tick: SimTick, port: &mut dyn NetworkPort) {
        let drained: Vec<Digest> = self
            .trackers
            .iter()
            .filter(|(_, tracker)| tracker.waiting() == 0)
            .map(|(hash, _)| hash.clone())
            .collect();

        for hash in drained {
            let Some(tracker) = self.trackers.shift_remove(&hash) else {
                continue;
            };
            for peer in tracker.stalled() {
                debug!("{} disconnects stalled {}", self.id, peer);
                self.links.cool_down(peer, tick + self.config.connection_cooldown);
                if self.close_download_from(peer, port) {
                    port.close_download(&self.id, peer);
                }
                if self.close_upload_to(peer, port) {
                    port.close_upload(&self.id, peer);
                }
            }
        }
    }

    fn refresh_connections(&mut self, tick: SimTick, port: &mut dyn NetworkPort) {
        let interval = port.config().connection_check_interval;
        self.links.expire_cooldowns(tick);
        self.refresh_uploads(tick, interval, port);
        self.refresh_downloads(tick, interval, port);
        self.links.set_last_check(tick);
    }

    fn refresh_uploads(&mut self, tick: SimTick, interval: SimTick, port: &mut dyn NetworkPort) {
        let target = self
            .links
            .retarget_uploads(interval, self.config.upload_speed, self.config.upload_limit);

        for peer in self.links.stale_uploads(tick, self.config.connection_stale) {
            port.close_upload(&self.id, &peer);
            self.links.remove_upload(&peer);
            self.forget_target(&peer);
            self.links.cool_down(&peer, tick + self.config.connection_cooldown);
            port.log(
                tick,
                &self.id,
                Event::LinkTerminated {
                    peer,
                    side: LinkSide::Upload,
                },
            );
        }

        if self.links.upload_count() < target {
            if let Some((peer, delay)) = port.request_upload(&self.id) {
                self.links.insert_upload(&peer, delay, tick);
            }
        } else {
            let excess = self.links.upload_count() - target;
            let victims: Vec<NodeId> = self.links.uploads().take(excess).cloned().collect();
            for peer in victims {
                port.close_upload(&self.id, &peer);
                self.links.remove_upload(&peer);
                self.forget_target(&peer);
            }
        }
    }

    fn refresh_downloads(&mut self, tick: SimTick, interval: SimTick, port: &mut dyn NetworkPort) {
        let target = self
            .links
            .retarget_downloads(interval, self.config.download_speed, self.config.download_limit);

        for peer in self.links.stale_downloads(tick, self.config.connection_stale) {
            port.close_download(&self.id, &peer);
            self.links.remove_download(&peer);
            self.forget_target(&peer);
            self.links.cool_down(&peer, tick + self.config.connection_cooldown);
            port.log(
                tick,
                &self.id,
                Event::LinkTerminated {
                    peer,
                    side: LinkSide::Download,
                },
            );
        }

        if self.links.download_count() < target {
            if let Some((peer, delay)) = port.request_download(&self.id) {
                self.links.insert_download(&peer, delay, tick);
            }
        } else {
            let excess = self.links.download_count() - target;
            let victims: Vec<NodeId> = self.links.downloads().take(excess).cloned().collect();
            for peer in victims {
                port.close_download(&self.id, &peer);
                self.links.remove_download(&peer);
                self.forget_target(&peer);
            }
        }
    }

    // ===== Outbound =====

    /// Queue a signal for `target`, delivered after the link delay.
    pub fn send(&mut self, target: &str, signal: NodeSignal, at: SimTick, port: &dyn NetworkPort) {
        self.sent.bump(signal.kind);
        self.links.record_sent(signal.wire_len());
        let delay = self
            .links
            .delay_to(target)
            .unwrap_or_else(|| port.pair_delay(&self.id, target));
        self.outbox.push(SimJob {
            signal,
            target: target.to_string(),
            deliver_at: at + delay,
        });
    }

    /// Untracked send to every upload except the signal's author.
    pub fn send_to_uploads(&mut self, signal: NodeSignal, at: SimTick, port: &dyn NetworkPort) {
        let targets: Vec<NodeId> = self
            .links
            .uploads()
            .filter(|peer| **peer != signal.origin)
            .cloned()
            .collect();
        for target in targets {
            self.send(&target, signal.clone(), at, port);
        }
    }

    /// Tracked broadcast of an own signal to every upload, bypassing local
    /// processing.
    pub fn publish(&mut self, signal: NodeSignal) {
        let me = self.id.clone();
        self.track_to_uploads(signal, &me);
    }

    fn track<'a>(&mut self, signal: NodeSignal, relay: &str, targets: impl IntoIterator<Item = &'a NodeId>) {
        let signal = signal.relayed_by(self.id.clone());
        let hash = signal.hash();
        let tracker = OutboundSignalTracker::new(signal, relay, &self.id, targets);
        self.trackers.insert(hash, tracker);
    }

    fn track_to_uploads(&mut self, signal: NodeSignal, relay: &str) {
        let targets: Vec<NodeId> = self.links.uploads().cloned().collect();
        self.track(signal, relay, &targets);
    }

    fn resend_tracked(&mut self, at: SimTick, port: &mut dyn NetworkPort) {
        let threshold = self.config.repetition_threshold;
        let factor = port.config().resend_factor;
        let fallback = port.config().default_connection_cost;

        let links = &self.links;
        let mut due = Vec::new();
        for tracker in self.trackers.values_mut() {
            tracker.remove_stalled(threshold);
            let targets = tracker.due_for_resend(at, factor, |peer| links.delay_to(peer).unwrap_or(fallback));
            for target in targets {
                due.push((target, tracker.signal().clone()));
            }
        }

        for (target, signal) in due {
            self.send(&target, signal, at, port);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hc_config::NetworkConfig;
    use crate::hc_events::CollectorSink;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Scripted scheduler stand-in.
    pub(crate) struct StubPort {
        pub tick: SimTick,
        pub config: NetworkConfig,
        pub rng: StdRng,
        pub sink: CollectorSink,
        pub offers: VecDeque<(NodeId, SimTick)>,
        pub closed: Vec<(NodeId, NodeId)>,
    }

    impl StubPort {
        pub(crate) fn new() -> Self {
            Self {
                tick: 0,
                config: NetworkConfig::default(),
                rng: StdRng::seed_from_u64(7),
                sink: CollectorSink::new(),
                offers: VecDeque::new(),
                closed: Vec::new(),
            }
        }
    }

    impl NetworkPort for StubPort {
        fn current_tick(&self) -> SimTick {
            self.tick
        }

        fn config(&self) -> &NetworkConfig {
            &self.config
        }

        fn pair_delay(&self, _a: &str, _b: &str) -> SimTick {
            self.config.default_connection_cost
        }

        fn request_upload(&mut self, _caller: &str) -> Option<(NodeId, SimTick)> {
            self.offers.pop_front()
        }

        fn request_download(&mut self, _caller: &str) -> Option<(NodeId, SimTick)> {
            self.offers.pop_front()
        }

        fn close_upload(&mut self, caller: &str, target: &str) -> bool {
            self.closed.push((caller.to_string(), target.to_string()));
            true
        }

        fn close_download(&mut self, caller: &str, target: &str) -> bool {
            self.closed.push((caller.to_string(), target.to_string()));
            true
        }

        fn rng(&mut self) -> &mut StdRng {
            &mut self.rng
        }

        fn log(&mut self, tick: SimTick, origin: &str, event: Event) {
            self.sink.log(tick, origin, event);
        }
    }

    use crate::hc_events::EventSink;

    pub(crate) fn seeded_node(id: &str, grants: &[(&str, Permission)]) -> Node {
        let grants: IndexMap<NodeId, Permission> = grants
            .iter()
            .map(|(id, level)| (id.to_string(), *level))
            .collect();
        let mut node = Node::new(id, NodeConfig::default());
        node.seed_permissions(&grants).unwrap();
        node
    }

    pub(crate) fn block_from(creator: &str, previous: &str, height: u64, txs: &[Transaction]) -> Block {
        let mut block = Block::from_transactions(creator, txs);
        block.previous_hash = previous.to_string();
        block.previous_chunk_hash = crate::hc_interface::GENESIS_HASH.to_string();
        block.height = height;
        block
    }

    fn jobs_of(node: &Node, kind: SignalKind) -> Vec<&SimJob> {
        node.outbox().iter().filter(|job| job.signal.kind == kind).collect()
    }

    #[test]
    fn test_transaction_admission_acks_and_tracks() {
        let mut port = StubPort::new();
        let mut node = seeded_node(
            "n",
            &[("p", Permission::Publish), ("n", Permission::Read), ("u", Permission::Read)],
        );
        node.connect_upload("u", 10, 0);
        node.connect_upload("p", 10, 0);

        let signal = NodeSignal::new_transaction("p", "p;42");
        node.deliver(signal.clone(), &mut port);

        assert_eq!(node.pool().len(), 1);
        let acks = jobs_of(&node, SignalKind::Ack);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].target, "p");
        assert_eq!(acks[0].deliver_at, 10);
        assert_eq!(acks[0].signal.payload, Some(signal.hash()));

        // the author is never a relay target
        let tracker = node.trackers().get(&signal.hash()).unwrap();
        assert_eq!(tracker.waiting(), 1);
        assert!(tracker.is_pending("u"));
    }

    #[test]
    fn test_transaction_dedup_window() {
        let mut port = StubPort::new();
        let mut node = seeded_node("n", &[("p", Permission::Publish), ("u", Permission::Read)]);
        node.connect_upload("u", 10, 0);

        let signal = NodeSignal::new_transaction("p", "p;42");
        node.deliver(signal.clone(), &mut port);
        assert!(node.seen_transaction(&signal.hash(), &Transaction::new("p", "42").hash()));

        // relayed copy while the tracker is still open
        port.tick = 10;
        node.deliver(signal.clone().relayed_by("u"), &mut port);
        assert_eq!(node.pool().len(), 1);

        // tracker drains, the folded-hash window still rejects it
        port.tick = 20;
        node.deliver(NodeSignal::ack("u", &signal).relayed_by("u"), &mut port);
        node.execute(&mut port);
        assert!(node.trackers().get(&signal.hash()).is_none());

        port.tick = 40;
        node.deliver(signal.clone().relayed_by("u"), &mut port);
        assert!(node.trackers().get(&signal.hash()).is_none());
        assert_eq!(node.pool().len(), 1);
    }

    #[test]
    fn test_transaction_needs_publish() {
        let mut port = StubPort::new();
        let mut node = seeded_node("n", &[("r", Permission::Read)]);
        node.deliver(NodeSignal::new_transaction("r", "r;1"), &mut port);
        port.tick = 5;
        node.deliver(NodeSignal::new_transaction("stranger", "stranger;1"), &mut port);
        assert!(node.pool().is_empty());
        // both still get acknowledged
        assert_eq!(jobs_of(&node, SignalKind::Ack).len(), 2);
    }

    #[test]
    fn test_malformed_signal_is_dropped() {
        let mut port = StubPort::new();
        let mut node = seeded_node("n", &[("w", Permission::Write)]);
        node.deliver(NodeSignal::new_block("w", "not a block"), &mut port);
        port.tick = 3;
        node.deliver(NodeSignal::new_transaction("w", "no separator"), &mut port);
        assert_eq!(node.chain().height(), 0);
        assert!(node.pool().is_empty());
        assert_eq!(
            port.sink
                .count(|_, e| matches!(e, Event::DecodeFailed { .. })),
            2
        );
    }

    #[test]
    fn test_fork_rejection() {
        let mut port = StubPort::new();
        let mut node = seeded_node(
            "n",
            &[("a", Permission::Write), ("b", Permission::Write), ("n", Permission::Read)],
        );
        let tx = [Transaction::new("a", "1")];

        let wrong = block_from("b", "INIT", 1, &tx);
        node.deliver(NodeSignal::new_block("b", wrong.encode()), &mut port);
        assert_eq!(node.chain().height(), 0);
        assert_eq!(node.waiting_blocks().len(), 1);
        assert_eq!(node.suspicion("b"), 1);

        port.tick = 100;
        let right = block_from("a", "INIT", 1, &tx);
        node.deliver(NodeSignal::new_block("a", right.encode()), &mut port);
        assert_eq!(node.chain().height(), 1);
        assert_eq!(node.chain().current_block().map(|b| b.creator.as_str()), Some("a"));
        assert!(node.waiting_blocks().is_empty());
        assert_eq!(node.auth().next_creator().map(String::as_str), Some("b"));

        // the stale fork is not accepted later either
        port.tick = 200;
        node.deliver(NodeSignal::new_block("b", wrong.encode()), &mut port);
        assert_eq!(node.chain().height(), 1);
        assert!(node.waiting_blocks().is_empty());
    }

    #[test]
    fn test_gap_block_waits_until_predecessor_arrives() {
        let mut port = StubPort::new();
        let mut node = seeded_node("n", &[("a", Permission::Write), ("b", Permission::Write)]);
        node.connect_upload("u", 10, 0);

        let first = block_from("a", "INIT", 1, &[Transaction::new("a", "1")]);
        let mut second = block_from("b", "", 2, &[Transaction::new("a", "2")]);
        second.previous_hash = first.hash();

        node.deliver(NodeSignal::new_block("b", second.encode()), &mut port);
        assert_eq!(node.waiting_blocks().len(), 1);
        assert_eq!(
            port.sink.count(|_, e| matches!(e, Event::FutureBlock { .. })),
            1
        );

        port.tick = 100;
        node.deliver(NodeSignal::new_block("a", first.encode()), &mut port);
        assert_eq!(node.chain().height(), 1);

        port.tick = 200;
        node.execute(&mut port);
        assert_eq!(node.chain().height(), 2);
        assert!(node.waiting_blocks().is_empty());
        assert!(jobs_of(&node, SignalKind::NewBlock)
            .iter()
            .any(|job| job.signal.payload.as_deref() == Some(second.encode().as_str())));
        assert_eq!(node.chain().last_received(), 200);
        assert_eq!(
            port.sink
                .count(|_, e| matches!(e, Event::ChainHeight { height: 2 })),
            1
        );
    }

    #[test]
    fn test_pool_evicts_after_cache_heights() {
        let mut port = StubPort::new();
        let mut node = seeded_node("n", &[("a", Permission::Write), ("p", Permission::Publish)]);
        node.config_mut().transaction_height_cache = 1;

        node.deliver(NodeSignal::new_transaction("p", "p;stale"), &mut port);
        assert_eq!(node.pool().len(), 1);

        port.tick = 100;
        let block = block_from("a", "INIT", 1, &[Transaction::new("a", "1")]);
        node.deliver(NodeSignal::new_block("a", block.encode()), &mut port);
        assert_eq!(node.chain().height(), 1);
        assert!(node.pool().is_empty());
        assert_eq!(
            port.sink
                .count(|_, e| matches!(e, Event::PoolEvicted { count: 1 })),
            1
        );
    }

    #[test]
    fn test_folded_transaction_is_not_readmitted() {
        let mut port = StubPort::new();
        let mut node = seeded_node("n", &[("a", Permission::Write), ("p", Permission::Publish)]);
        let tx = Transaction::new("p", "7");
        let block = block_from("a", "INIT", 1, &[tx.clone()]);
        node.deliver(NodeSignal::new_block("a", block.encode()), &mut port);
        assert_eq!(node.chain().height(), 1);

        port.tick = 100;
        let signal = NodeSignal::new_transaction("p", tx.encode());
        let signal_hash = signal.hash();
        assert!(node.seen_transaction(&signal_hash, &tx.hash()));
        node.deliver(signal, &mut port);
        assert!(node.pool().is_empty());
        assert!(node.trackers().get(&signal_hash).is_none());
    }

    #[test]
    fn test_auth_block_is_applied_once() {
        let mut port = StubPort::new();
        let mut node = seeded_node("n", &[("w", Permission::WriteAuth), ("n", Permission::Read)]);
        let grant = Block::new("w", "fresh 2");
        let signal = NodeSignal::new_auth_block("w", grant.encode());

        node.deliver(signal.clone(), &mut port);
        assert_eq!(node.auth().chain().height(), 2);
        assert_eq!(node.auth().permission("fresh"), Some(Permission::Write));

        // relayed copy while the tracker is open
        port.tick = 50;
        node.deliver(signal.clone().relayed_by("x"), &mut port);
        assert_eq!(node.auth().chain().height(), 2);

        // late copy after the tracker is released
        port.tick = 100;
        node.execute(&mut port);
        assert!(node.trackers().get(&signal.hash()).is_none());
        port.tick = 200;
        node.deliver(signal.relayed_by("y"), &mut port);
        assert_eq!(node.auth().chain().height(), 2);
        assert_eq!(
            port.sink
                .count(|_, e| matches!(e, Event::AuthBlockAccepted { .. })),
            1
        );
    }

    #[test]
    fn test_auth_block_needs_rights_and_turn() {
        let mut port = StubPort::new();
        let mut node = seeded_node(
            "n",
            &[
                ("w", Permission::WriteAuth),
                ("v", Permission::WriteAuth),
                ("x", Permission::Write),
                ("n", Permission::Read),
            ],
        );
        assert_eq!(node.auth().next_auth_creator().map(String::as_str), Some("w"));

        let attempts = [
            // sender without auth rights
            ("x", Block::new("x", "x 3")),
            // creator without auth rights
            ("w", Block::new("x", "x 3")),
            // out of turn
            ("v", Block::new("v", "x 3")),
        ];
        for (i, (sender, block)) in attempts.iter().enumerate() {
            port.tick = i as SimTick * 100;
            node.deliver(NodeSignal::new_auth_block(*sender, block.encode()), &mut port);
            assert_eq!(node.auth().chain().height(), 1, "attempt {}", i);
        }
        assert_eq!(node.auth().permission("x"), Some(Permission::Write));

        port.tick = 500;
        node.deliver(NodeSignal::new_auth_block("w", Block::new("w", "x 3").encode()), &mut port);
        assert_eq!(node.auth().chain().height(), 2);
        assert_eq!(node.auth().permission("x"), Some(Permission::WriteAuth));
        assert_eq!(node.auth().next_auth_creator().map(String::as_str), Some("v"));
    }

    #[test]
    fn test_block_request_for_pruned_body_waits() {
        let mut port = StubPort::new();
        let mut node = seeded_node("n", &[("n", Permission::Write), ("r", Permission::Read)]);
        node.config_mut().retained_chunks = Some(1);
        node.connect_upload("u", 10, 0);

        for i in 0..5u64 {
            port.tick = i * 100;
            node.deliver(NodeSignal::new_transaction("n", format!("n;{}", i)), &mut port);
            let block = node.draft_block(1).unwrap();
            node.process_signal(NodeSignal::new_block("n", block.encode()), port.tick, &mut port);
        }
        assert_eq!(node.chain().height(), 5);
        assert_eq!(
            node.chain().find_by_previous(crate::hc_interface::GENESIS_HASH),
            Lookup::Unfetched
        );

        port.tick = 1000;
        let request = NodeSignal::block_request("r", "INIT");
        node.deliver(request.clone(), &mut port);

        let waits = jobs_of(&node, SignalKind::RequestWait);
        assert_eq!(waits.len(), 1);
        assert_eq!(waits[0].target, "r");
        assert_eq!(waits[0].signal.payload, Some(request.hash()));
        assert!(jobs_of(&node, SignalKind::BlockResponse).is_empty());

        // asked upstream on behalf of the caller
        let upstream = node.trackers().get(&request.hash()).unwrap();
        assert!(upstream.is_pending("u"));
    }

    #[test]
    fn test_block_request_replies() {
        let mut port = StubPort::new();
        let mut node = seeded_node(
            "n",
            &[("a", Permission::Write), ("r", Permission::Read)],
        );
        let first = block_from("a", "INIT", 1, &[Transaction::new("a", "1")]);
        node.deliver(NodeSignal::new_block("a", first.encode()), &mut port);
        let head = node.chain().current_hash().to_string();

        port.tick = 100;
        node.deliver(NodeSignal::block_request("r", "INIT"), &mut port);
        port.tick = 110;
        node.deliver(NodeSignal::block_request("r", head.clone()), &mut port);
        port.tick = 120;
        node.deliver(NodeSignal::block_request("stranger", "INIT"), &mut port);

        let responses = jobs_of(&node, SignalKind::BlockResponse);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].target, "r");
        assert_eq!(responses[0].signal.payload, Some(first.encode()));

        let denies = jobs_of(&node, SignalKind::RequestDeny);
        assert_eq!(denies.len(), 2);
        assert_eq!(denies[1].target, "stranger");
    }

    #[test]
    fn test_block_response_is_accepted_without_relay() {
        let mut port = StubPort::new();
        let mut node = seeded_node("n", &[("a", Permission::Write), ("r", Permission::Read)]);
        node.connect_upload("x", 10, 0);
        let first = block_from("a", "INIT", 1, &[Transaction::new("a", "1")]);

        node.deliver(NodeSignal::block_response("r", first.encode()), &mut port);
        assert_eq!(node.chain().height(), 1);
        assert!(jobs_of(&node, SignalKind::NewBlock).is_empty());
        assert!(node.trackers().is_empty());
    }

    #[test]
    fn test_forger_timeout_shifts_rotation() {
        let mut port = StubPort::new();
        let mut node = seeded_node(
            "n",
            &[("a", Permission::Write), ("b", Permission::Write), ("n", Permission::Publish)],
        );
        node.config_mut().forger_timeout = 10;
        node.config_mut().forger_tryout = 1;
        node.connect_download("a", 10, 0);
        node.connect_upload("a", 10, 0);

        node.deliver(NodeSignal::new_transaction("n", "n;1"), &mut port);
        assert_eq!(node.pool().len(), 1);

        port.tick = 20;
        node.execute(&mut port);
        assert_eq!(jobs_of(&node, SignalKind::BlockRequest).len(), 1);
        assert_eq!(node.auth().next_creator().map(String::as_str), Some("a"));

        port.tick = 40;
        node.execute(&mut port);
        assert_eq!(jobs_of(&node, SignalKind::BlockRequest).len(), 2);
        assert_eq!(node.auth().next_creator().map(String::as_str), Some("b"));
        assert_eq!(node.suspicion("a"), 1);
    }

    #[test]
    fn test_suspicious_forger_is_skipped() {
        let mut port = StubPort::new();
        let mut node = seeded_node("n", &[("a", Permission::Write), ("b", Permission::Write)]);
        node.config_mut().suspicion_threshold = 2;

        // b keeps sending well-formed blocks out of turn
        for (i, tick) in [0u64, 50].iter().enumerate() {
            port.tick = *tick;
            let block = block_from("b", "INIT", 1, &[Transaction::new("b", i.to_string())]);
            node.deliver(NodeSignal::new_block("b", block.encode()), &mut port);
        }
        assert_eq!(node.suspicion("b"), 2);

        // b is not next, so nothing happens yet
        port.tick = 100;
        node.execute(&mut port);
        assert_eq!(node.auth().next_creator().map(String::as_str), Some("a"));

        let block = block_from("a", "INIT", 1, &[Transaction::new("a", "x")]);
        node.deliver(NodeSignal::new_block("a", block.encode()), &mut port);
        assert_eq!(node.auth().next_creator().map(String::as_str), Some("b"));

        port.tick = 200;
        node.execute(&mut port);
        assert_eq!(node.auth().next_creator().map(String::as_str), Some("a"));
        assert_eq!(node.suspicion("b"), 0);
    }

    #[test]
    fn test_stalled_target_is_disconnected() {
        let mut port = StubPort::new();
        let mut node = seeded_node("n", &[("n", Permission::Publish)]);
        node.set_repetition_threshold(1);
        node.connect_upload("deadbeat", 10, 0);

        node.deliver(NodeSignal::new_transaction("n", "n;1"), &mut port);
        for tick in [0, 30, 60, 90] {
            port.tick = tick;
            node.execute(&mut port);
        }

        assert!(!node.links().has_upload("deadbeat"));
        assert!(node.links().is_cooling("deadbeat"));
        assert!(port
            .closed
            .contains(&("n".to_string(), "deadbeat".to_string())));
        assert!(node.trackers().is_empty());
    }

    #[test]
    fn test_active_updates_knowledge_and_relays_once() {
        let mut port = StubPort::new();
        let mut node = seeded_node("n", &[("w", Permission::Write)]);
        node.connect_upload("u", 10, 0);

        port.tick = 1500;
        node.deliver(NodeSignal::active("w", Some("3".to_string())), &mut port);
        assert_eq!(node.links().last_seen("w"), Some(1500));
        let relays = node
            .trackers()
            .values()
            .filter(|t| t.signal().kind == SignalKind::Active)
            .count();
        assert_eq!(relays, 1);

        // a second heartbeat inside the interval is recorded but not relayed
        port.tick = 1600;
        node.deliver(NodeSignal::active("w", Some("4".to_string())).relayed_by("u"), &mut port);
        assert_eq!(node.links().last_seen("w"), Some(1600));
        let relays = node
            .trackers()
            .values()
            .filter(|t| t.signal().kind == SignalKind::Active)
            .count();
        assert_eq!(relays, 1);
    }

    #[test]
    fn test_execute_waits_at_least_one_tick() {
        let mut port = StubPort::new();
        let mut node = Node::new("lonely", NodeConfig::default());
        assert!(node.execute(&mut port) >= 1);
        assert!(node.drain_outbox().is_empty());
    }

    #[test]
    fn test_connection_refresh_brokers_and_expires() {
        let mut port = StubPort::new();
        let mut node = Node::new("n", NodeConfig::default());
        port.offers.push_back(("x".to_string(), 30));
        port.offers.push_back(("y".to_string(), 40));

        port.tick = 500;
        node.execute(&mut port);
        assert!(node.links().has_upload("x"));
        assert!(node.links().has_download("y"));
        assert_eq!(node.links().delay_to("x"), Some(30));

        // nobody heartbeats, both links go stale
        port.tick = 3000;
        node.execute(&mut port);
        assert_eq!(node.links().upload_count(), 0);
        assert_eq!(node.links().download_count(), 0);
        assert!(node.links().is_cooling("x"));
        assert_eq!(
            port.sink
                .count(|_, e| matches!(e, Event::LinkTerminated { .. })),
            2
        );
    }
}
