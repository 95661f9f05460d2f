//! # hc_sim - Hybrid Blockchain Network Simulator
//!
//! A deterministic, single-threaded discrete-event simulator of a permissioned
//! blockchain. Nodes gossip transactions, take turns forging blocks in a
//! round-robin order fixed by an authorization chain, and keep a bounded set of
//! upload/download links sized by their bandwidth.
//!
//! ## Core Components
//!
//! - **Node**: protocol state machine (pool, chain, links, virtual workers)
//! - **AuthorizationChain**: permissions and the forger rotation
//! - **OutboundSignalTracker**: per-signal retry and stall detection
//! - **Network**: the scheduler owning every node, brokering connections and
//!   delivering signals after their link delay
//!
//! ## Usage
//!
//! ```no_run
//! use hc_sim::{BlockWriter, LinkDirection, Network, NetworkConfig, Node, NodeConfig, NodeSignal, Permission};
//!
//! let mut net = Network::new(NetworkConfig::default(), 123_456_789);
//! let writer = Node::new("A", NodeConfig::default()).with_policy(Box::new(BlockWriter::default()));
//! net.add_node(writer).unwrap();
//! net.add_node(Node::new("B", NodeConfig::default())).unwrap();
//! net.add_initial_auth("A", Permission::Write);
//! net.add_initial_auth("B", Permission::Read);
//! net.connect("A", "B", LinkDirection::Both, None).unwrap();
//!
//! net.inject(NodeSignal::new_transaction("A", "A;hello"), "A").unwrap();
//! net.run_until(1_000);
//! println!("{:?}", net.snapshot());
//! ```
//!
//! ## Scenarios
//!
//! YAML scenario files are run by the `scenario_runner` binary in `simulator/`.

// Wire types
pub mod hc_interface;
pub mod hc_digest;
pub mod hc_blocks;
pub mod hc_signal;

// Ledger
pub mod hc_chain;
pub mod hc_auth_chain;

// Node internals
pub mod hc_config;
pub mod hc_events;
pub mod hc_outbound;
pub mod hc_peers;
pub mod hc_node;
pub mod hc_policy;
pub mod hc_sales;

// Scheduler
pub mod hc_network;

// Re-export commonly used types
pub use hc_auth_chain::AuthorizationChain;
pub use hc_blocks::{Block, BlockChunk, Transaction};
pub use hc_chain::Chain;
pub use hc_config::{NetworkConfig, NodeConfig};
pub use hc_events::{CollectorSink, Event, EventCategory, EventSink, LogSink, NoOpSink};
pub use hc_interface::{DecodeError, Digest, LinkDirection, NetworkPort, NodeId, Permission, SimJob, SimTick};
pub use hc_network::{seed_from_phrase, Network, SimError};
pub use hc_node::{Node, NodeStats};
pub use hc_policy::{
    BlockFault, BlockWriter, Deaf, Delayed, DropForeignBlocks, FaultWeights, MaliciousWriter, OutboundMutator,
    ReadOnly, SalesGenerator, TickPolicy, TransactionGenerator,
};
pub use hc_sales::{SalesRecord, SalesStyle};
pub use hc_signal::{NodeSignal, SignalCounters, SignalKind};
