// Scenario Statistics

use hc_sim::{Network, NodeStats};

// ============================================================================
// Summary
// ============================================================================

/// Integer summary of one series. Empty series report -1 everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub mean: i64,
    pub mode: i64,
    pub median: i64,
    pub min: i64,
    pub max: i64,
}

impl Summary {
    pub fn of(values: &[i64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: -1,
                mode: -1,
                median: -1,
                min: -1,
                max: -1,
            };
        }

        let mut sorted = values.to_vec();
        sorted.sort_unstable();

        // the smallest of the most frequent values
        let mut mode = sorted[0];
        let mut best_run = 0;
        let mut run = 0;
        for (i, value) in sorted.iter().enumerate() {
            run = if i > 0 && sorted[i - 1] == *value { run + 1 } else { 1 };
            if run > best_run {
                best_run = run;
                mode = *value;
            }
        }

        Self {
            mean: sorted.iter().sum::<i64>() / sorted.len() as i64,
            mode,
            median: sorted[sorted.len() / 2],
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        }
    }
}

// ============================================================================
// Chain Statistics
// ============================================================================

#[derive(Debug, Clone)]
pub struct ChainStatistics {
    pub rows: Vec<(&'static str, Summary)>,
}

impl ChainStatistics {
    pub fn collect(net: &Network) -> Self {
        let nodes = net.snapshot();
        let blocks = net.longest_chain_blocks();

        let verified: Vec<i64> = nodes.iter().map(|s| s.accepted_transactions as i64).collect();
        let heights: Vec<i64> = nodes.iter().map(|s| s.height as i64).collect();
        let per_block: Vec<i64> = blocks.iter().map(|b| b.entries().count() as i64).collect();
        let sizes: Vec<i64> = blocks.iter().map(|b| b.wire_len() as i64).collect();

        Self {
            rows: vec![
                ("Verified Transactions", Summary::of(&verified)),
                ("Blocks accepted", Summary::of(&heights)),
                ("Transactions in blocks", Summary::of(&per_block)),
                ("Block sizes (bytes)", Summary::of(&sizes)),
            ],
        }
    }

    pub fn print(&self) {
        println!("  {:<24} {:>8} {:>8} {:>8} {:>8} {:>8}", "", "mean", "mode", "median", "min", "max");
        for (label, s) in &self.rows {
            println!(
                "  {:<24} {:>8} {:>8} {:>8} {:>8} {:>8}",
                label, s.mean, s.mode, s.median, s.min, s.max
            );
        }
    }
}

/// One line per node.
pub fn print_node_table(nodes: &[NodeStats]) {
    println!(
        "  {:<16} {:<18} {:>6} {:>6} {:>5} {:>5} {:>8} {:>8} {:>8}",
        "node", "class", "perm", "height", "up", "down", "pool", "sent", "recv"
    );
    for s in nodes {
        let permission = s.permission.map_or_else(|| "-".to_string(), |p| p.to_string());
        println!(
            "  {:<16} {:<18} {:>6} {:>6} {:>5} {:>5} {:>8} {:>8} {:>8}",
            s.id,
            s.policy,
            permission,
            s.height,
            s.uploads,
            s.downloads,
            s.pool_size,
            s.sent.total(),
            s.received.total()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let s = Summary::of(&[5, 1, 3, 3, 9]);
        assert_eq!(s.mean, 4);
        assert_eq!(s.mode, 3);
        assert_eq!(s.median, 3);
        assert_eq!((s.min, s.max), (1, 9));
    }

    #[test]
    fn test_summary_ties_and_empty() {
        let s = Summary::of(&[4, 2, 4, 2]);
        assert_eq!(s.mode, 2);
        assert_eq!(s.median, 4);
        assert_eq!(Summary::of(&[]).mode, -1);
        assert_eq!(Summary::of(&[]).max, -1);
    }
}
