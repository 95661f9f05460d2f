// Scenario Network Builder

use std::error::Error;

use hc_sim::{
    BlockWriter, Deaf, Delayed, DropForeignBlocks, EventSink, LinkDirection, MaliciousWriter, Network, Node,
    NodeConfig, ReadOnly, SalesGenerator, SimTick, TransactionGenerator,
};

use super::config::{NodeClass, NodeRecipe, ScenarioFile};

/// Ticks between two dummy transactions of a generator (default for recipes)
const DEFAULT_TICKS_PER_TRANSACTION: SimTick = 200;

/// Register every node, apply the initial permissions and the explicit links.
pub fn build_network(scenario: &ScenarioFile, sink: Box<dyn EventSink>) -> Result<Network, Box<dyn Error>> {
    let mut net = scenario.network().with_sink(sink);
    net.set_tick(scenario.start);

    for recipe in scenario.recipes() {
        let node = build_node(&recipe, net.len() as SimTick);
        net.add_node_at(node, scenario.start)?;

        if let Some(cost) = recipe.connection_cost {
            net.set_connection_cost(&recipe.id, cost)?;
        }
        if let Some(permission) = recipe.permission {
            net.add_initial_auth(recipe.id.clone(), permission.resolve()?);
        }
    }

    for line in &scenario.connections {
        let (from, to, direction, delay) = parse_connection(line)?;
        net.connect(&from, &to, direction, delay)?;
    }

    net.seed_permissions()?;
    Ok(net)
}

/// `existing` is how many nodes were registered before this one; transaction
/// generators use it to stagger their first batch.
pub fn build_node(recipe: &NodeRecipe, existing: SimTick) -> Node {
    let mut config = NodeConfig::default();
    if let Some(v) = recipe.upload_speed {
        config.upload_speed = v;
    }
    if let Some(v) = recipe.download_speed {
        config.download_speed = v;
    }
    if let Some(v) = recipe.upload_limit {
        config.upload_limit = v;
    }
    if let Some(v) = recipe.download_limit {
        config.download_limit = v;
    }
    if let Some(v) = recipe.connection_cooldown {
        config.connection_cooldown = v;
    }
    if let Some(v) = recipe.connection_stale {
        config.connection_stale = v;
    }
    if let Some(v) = recipe.repetition_threshold {
        config.repetition_threshold = v;
    }

    let node = Node::new(recipe.id.clone(), config);
    let min_transactions = recipe.min_transactions.unwrap_or(0);

    match recipe.class {
        NodeClass::Read => node.with_policy(Box::new(ReadOnly)),
        NodeClass::BlockWriter => node.with_policy(Box::new(BlockWriter { min_transactions })),
        NodeClass::DelayedBlockWriter => node
            .with_policy(Box::new(BlockWriter { min_transactions }))
            .with_mutator(Box::new(DropForeignBlocks)),
        NodeClass::MaliciousWriter => node.with_policy(Box::new(MaliciousWriter {
            weights: recipe.fault_weights.unwrap_or_default(),
        })),
        NodeClass::Delayed => {
            let mut delayed = Delayed::default();
            if let Some(extra) = recipe.extra_delay {
                delayed.extra_delay = extra;
            }
            node.with_mutator(Box::new(delayed))
        }
        NodeClass::Deaf => node.with_mutator(Box::new(Deaf)),
        NodeClass::Transaction => node.with_policy(Box::new(TransactionGenerator::new(
            recipe
                .ticks_per_transaction
                .unwrap_or(DEFAULT_TICKS_PER_TRANSACTION),
            existing,
        ))),
        NodeClass::SalesTransaction => {
            let mut generator = SalesGenerator::default();
            if let Some(chance) = recipe.chance {
                generator.chance = chance;
            }
            if let Some(style) = recipe.style {
                generator.style = style;
            }
            node.with_policy(Box::new(generator))
        }
    }
}

/// `"A B U|D|UD [delay]"`
pub fn parse_connection(line: &str) -> Result<(String, String, LinkDirection, Option<SimTick>), String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let [from, to, direction, rest @ ..] = parts.as_slice() else {
        return Err(format!("connection needs `FROM TO DIRECTION [DELAY]`: {:?}", line));
    };

    let direction: LinkDirection = direction
        .parse()
        .map_err(|_| format!("unknown direction {:?} in {:?}", direction, line))?;

    let delay = match rest {
        [] => None,
        [delay] => Some(
            delay
                .parse::<SimTick>()
                .map_err(|e| format!("bad delay {:?} in {:?}: {}", delay, line, e))?,
        ),
        _ => return Err(format!("trailing input in connection {:?}", line)),
    };

    Ok((from.to_string(), to.to_string(), direction, delay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hc_sim::{NoOpSink, Permission};

    #[test]
    fn test_parse_connection() {
        let (from, to, direction, delay) = parse_connection("A B UD 10").unwrap();
        assert_eq!((from.as_str(), to.as_str()), ("A", "B"));
        assert_eq!(direction, LinkDirection::Both);
        assert_eq!(delay, Some(10));

        assert_eq!(parse_connection("A B D").unwrap().3, None);
        assert!(parse_connection("A B").is_err());
        assert!(parse_connection("A B X").is_err());
        assert!(parse_connection("A B U ten").is_err());
    }

    #[test]
    fn test_build_network() {
        let scenario: ScenarioFile = serde_yaml::from_str(
            r#"
end: 100
nodes:
  - id: A
    class: block_writer
    permission: write
  - id: B
    class: deaf
    permission: read
    connection_cost: 42
  - id: T
    class: transaction
    permission: publish
connections:
  - "A B UD"
"#,
        )
        .unwrap();

        let net = build_network(&scenario, Box::new(NoOpSink)).unwrap();
        assert_eq!(net.len(), 3);
        assert_eq!(net.connection_cost("B"), 42);

        let a = net.node("A").unwrap();
        assert_eq!(a.policy_name(), "block_writer");
        assert!(a.links().has_upload("B") && a.links().has_download("B"));
        assert_eq!(a.auth().permission("T"), Some(Permission::Publish));
        assert_eq!(net.node("T").unwrap().policy_name(), "transaction");
    }

    #[test]
    fn test_unknown_connection_target() {
        let scenario: ScenarioFile = serde_yaml::from_str(
            r#"
end: 100
nodes:
  - id: A
    class: read
connections:
  - "A Z U"
"#,
        )
        .unwrap();
        assert!(build_network(&scenario, Box::new(NoOpSink)).is_err());
    }
}
