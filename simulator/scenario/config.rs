// Scenario File Format

use std::path::PathBuf;

use hc_sim::{seed_from_phrase, FaultWeights, Network, NetworkConfig, Permission, SalesStyle, SimTick};
use serde::Deserialize;

/// Seed used when a scenario does not name one.
pub const DEFAULT_SEED: u64 = 123_456_789;

/// One YAML scenario.
#[derive(Debug, Deserialize)]
pub struct ScenarioFile {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub seed: Option<SeedSpec>,

    /// First tick of the run (default: 0)
    #[serde(default)]
    pub start: SimTick,

    /// The run stops before this tick
    pub end: SimTick,

    /// Overrides of the scheduler constants; missing keys keep their defaults
    #[serde(default)]
    pub network: Option<NetworkConfig>,

    #[serde(default)]
    pub nodes: Vec<NodeRecipe>,

    #[serde(default)]
    pub many_nodes: Vec<ManyNodes>,

    /// `"A B U|D|UD [delay]"`
    #[serde(default)]
    pub connections: Vec<String>,

    /// Transactions handed to a node at a given tick
    #[serde(default)]
    pub transactions: Vec<ScheduledTransaction>,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Reference transcript to compare the watched events against
    #[serde(default)]
    pub compare: Option<PathBuf>,

    /// Write the watched events to this file
    #[serde(default)]
    pub record: Option<PathBuf>,
}

impl ScenarioFile {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed scenario")
    }

    /// Single recipes first, then the expanded groups.
    pub fn recipes(&self) -> Vec<NodeRecipe> {
        let mut recipes = self.nodes.clone();
        for group in &self.many_nodes {
            recipes.extend(group.expand());
        }
        recipes
    }

    pub fn network(&self) -> Network {
        let config = self.network.unwrap_or_default();
        match &self.seed {
            None => Network::new(config, DEFAULT_SEED),
            Some(SeedSpec::Number(seed)) => Network::new(config, *seed),
            Some(SeedSpec::Phrase(phrase)) => Network::from_seed_bytes(config, seed_from_phrase(phrase)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SeedSpec {
    Number(u64),
    Phrase(String),
}

/// Either a numeric level or a name such as `write_auth`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum PermissionSpec {
    Level(i64),
    Named(Permission),
}

impl PermissionSpec {
    pub fn resolve(self) -> Result<Permission, hc_sim::DecodeError> {
        match self {
            PermissionSpec::Level(level) => Permission::from_level(level),
            PermissionSpec::Named(permission) => Ok(permission),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    Read,
    BlockWriter,
    DelayedBlockWriter,
    MaliciousWriter,
    Delayed,
    Deaf,
    Transaction,
    SalesTransaction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeRecipe {
    pub id: String,
    pub class: NodeClass,

    #[serde(default)]
    pub permission: Option<PermissionSpec>,

    // Per-node overrides
    #[serde(default)]
    pub upload_speed: Option<u64>,
    #[serde(default)]
    pub download_speed: Option<u64>,
    #[serde(default)]
    pub upload_limit: Option<usize>,
    #[serde(default)]
    pub download_limit: Option<usize>,
    #[serde(default)]
    pub connection_cooldown: Option<SimTick>,
    #[serde(default)]
    pub connection_stale: Option<SimTick>,
    #[serde(default)]
    pub repetition_threshold: Option<u32>,
    #[serde(default)]
    pub connection_cost: Option<SimTick>,

    // Class parameters
    #[serde(default)]
    pub ticks_per_transaction: Option<SimTick>,
    #[serde(default)]
    pub min_transactions: Option<usize>,
    #[serde(default)]
    pub extra_delay: Option<SimTick>,
    #[serde(default)]
    pub fault_weights: Option<FaultWeights>,
    #[serde(default)]
    pub chance: Option<f64>,
    #[serde(default)]
    pub style: Option<SalesStyle>,
}

impl NodeRecipe {
    pub fn new(id: impl Into<String>, class: NodeClass) -> Self {
        Self {
            id: id.into(),
            class,
            permission: None,
            upload_speed: None,
            download_speed: None,
            upload_limit: None,
            download_limit: None,
            connection_cooldown: None,
            connection_stale: None,
            repetition_threshold: None,
            connection_cost: None,
            ticks_per_transaction: None,
            min_transactions: None,
            extra_delay: None,
            fault_weights: None,
            chance: None,
            style: None,
        }
    }
}

/// `count` identical nodes named `{id_prefix}_{i}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ManyNodes {
    pub id_prefix: String,
    pub class: NodeClass,
    pub count: usize,

    #[serde(default)]
    pub permission: Option<PermissionSpec>,
    #[serde(default)]
    pub upload_speed: Option<u64>,
    #[serde(default)]
    pub download_speed: Option<u64>,
    #[serde(default)]
    pub ticks_per_transaction: Option<SimTick>,
    #[serde(default)]
    pub min_transactions: Option<usize>,

    /// Sales transactions the whole group should produce per thousand ticks
    #[serde(default)]
    pub transactions_per_second: Option<u32>,
    #[serde(default)]
    pub style: Option<SalesStyle>,
}

impl ManyNodes {
    pub fn expand(&self) -> Vec<NodeRecipe> {
        let chance = self
            .transactions_per_second
            .map(|desired| hc_sim::SalesGenerator::chance_for(self.count as u32, desired));

        (0..self.count)
            .map(|i| {
                let mut recipe = NodeRecipe::new(format!("{}_{}", self.id_prefix, i), self.class);
                recipe.permission = self.permission;
                recipe.upload_speed = self.upload_speed;
                recipe.download_speed = self.download_speed;
                recipe.ticks_per_transaction = self.ticks_per_transaction;
                recipe.min_transactions = self.min_transactions;
                recipe.chance = chance;
                recipe.style = self.style;
                recipe
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduledTransaction {
    pub at: SimTick,
    pub node: String,
    pub payload: String,
}

/// Which events reach the output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Print every event
    #[serde(default)]
    pub all: bool,

    /// Node ids whose events are printed
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Signal type names such as `NEW_BLOCK`
    #[serde(default)]
    pub signals: Vec<String>,

    /// Special category names such as `BLOCK_HEIGHT`
    #[serde(default)]
    pub special: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: sample
seed: "three writers"
end: 1000
network:
  block_delay: 40
nodes:
  - id: A
    class: block_writer
    permission: write
  - id: C
    class: read
    permission: 0
many_nodes:
  - id_prefix: shop
    class: sales_transaction
    count: 4
    permission: publish
    transactions_per_second: 8
    style: json
connections:
  - "A C UD 10"
"#;

    #[test]
    fn test_parse_sample() {
        let scenario: ScenarioFile = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(scenario.display_name(), "sample");
        assert!(matches!(scenario.seed, Some(SeedSpec::Phrase(_))));

        let network = scenario.network.unwrap();
        assert_eq!(network.block_delay, 40);
        assert_eq!(network.processing_delay, 1);

        let recipes = scenario.recipes();
        assert_eq!(recipes.len(), 6);
        assert_eq!(recipes[1].permission.unwrap().resolve().unwrap(), Permission::Read);
        assert_eq!(recipes[5].id, "shop_3");
        assert_eq!(recipes[5].style, Some(SalesStyle::Json));
        assert!((recipes[5].chance.unwrap() - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_level_rejected() {
        assert!(PermissionSpec::Level(9).resolve().is_err());
        assert_eq!(PermissionSpec::Level(3).resolve().unwrap(), Permission::WriteAuth);
    }
}
