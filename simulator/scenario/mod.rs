// Scenario Driver Module

pub mod builder;
pub mod config;
pub mod event_sinks;
pub mod stats;

// Re-export commonly used types
pub use builder::build_network;
pub use config::ScenarioFile;
pub use event_sinks::{RecordingSink, TranscriptSink, WatchSink};
pub use stats::{print_node_table, ChainStatistics};
