// Scenario Runner - Load and execute scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/three_nodes.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/three_nodes.yaml --seed 42
//   cargo run --bin scenario_runner scenarios/three_nodes.yaml --seed "any phrase"

mod scenario;

use std::cell::RefCell;
use std::env;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use hc_sim::{EventSink, LogSink, NodeSignal, Transaction};
use log::LevelFilter;
use simple_logger::SimpleLogger;

use scenario::config::SeedSpec;
use scenario::event_sinks::TranscriptReport;
use scenario::{
    build_network, print_node_table, ChainStatistics, RecordingSink, ScenarioFile, TranscriptSink, WatchSink,
};

fn main() {
    if let Err(e) = SimpleLogger::new().with_level(LevelFilter::Info).env().init() {
        eprintln!("logger already initialized: {}", e);
    }

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <scenario.yaml | directory/> [--seed SEED]", args[0]);
        eprintln!("\nExamples:");
        eprintln!("  {} scenarios/three_nodes.yaml", args[0]);
        eprintln!("  {} scenarios/", args[0]);
        eprintln!("  {} scenarios/three_nodes.yaml --seed 42", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);

    // Parse optional seed override
    let seed: Option<SeedSpec> = if args.len() >= 4 && args[2] == "--seed" {
        Some(parse_seed(&args[3]))
    } else {
        None
    };

    let outcome = if path.is_file() {
        run_scenario_file(path, seed.as_ref())
    } else if path.is_dir() {
        run_scenario_directory(path, seed.as_ref())
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(1);
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn parse_seed(raw: &str) -> SeedSpec {
    match raw.parse::<u64>() {
        Ok(number) => SeedSpec::Number(number),
        Err(_) => SeedSpec::Phrase(raw.to_string()),
    }
}

fn run_scenario_directory(dir: &Path, seed: Option<&SeedSpec>) -> Result<(), Box<dyn Error>> {
    let mut scenarios = Vec::new();

    // Find all .yaml files
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if matches!(path.extension().and_then(|s| s.to_str()), Some("yaml") | Some("yml")) {
            scenarios.push(path);
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        return Err(format!("No .yaml files found in {}", dir.display()).into());
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  SCENARIO RUNNER - Multiple Scenarios                 ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
    println!("Found {} scenario(s) to run\n", scenarios.len());

    let mut failed = 0;
    for (i, scenario_path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());
        if let Err(e) = run_scenario_file(scenario_path, seed) {
            eprintln!("Scenario {} failed: {}", scenario_path.display(), e);
            failed += 1;
        }
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  All scenarios complete!                               ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    if failed > 0 {
        return Err(format!("{} of {} scenario(s) failed", failed, scenarios.len()).into());
    }
    Ok(())
}

fn run_scenario_file(path: &Path, seed: Option<&SeedSpec>) -> Result<(), Box<dyn Error>> {
    println!("Loading scenario from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let mut scenario: ScenarioFile =
        serde_yaml::from_str(&yaml_content).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;
    if let Some(seed) = seed {
        scenario.seed = Some(seed.clone());
    }

    // Print scenario header
    let name = scenario.display_name().to_string();
    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  {}{}║", name, " ".repeat(54_usize.saturating_sub(name.len())));
    println!("╚════════════════════════════════════════════════════════╝\n");

    if let Some(ref desc) = scenario.description {
        println!("{}\n", desc);
    }

    // Sink chain: filter -> [transcript] -> [recording] -> log
    let mut downstream: Box<dyn EventSink> = Box::new(LogSink);
    let mut recorded: Option<Rc<RefCell<Vec<String>>>> = None;
    if scenario.record.is_some() {
        let recorder = RecordingSink::new(downstream);
        recorded = Some(recorder.lines());
        downstream = Box::new(recorder);
    }
    let mut report: Option<Rc<RefCell<TranscriptReport>>> = None;
    if let Some(reference) = scenario.compare.as_ref() {
        let reference = fs::read_to_string(reference)
            .map_err(|e| format!("Failed to read transcript {}: {}", reference.display(), e))?;
        let transcript = TranscriptSink::new(&reference, downstream);
        report = Some(transcript.report());
        downstream = Box::new(transcript);
    }
    let sink = WatchSink::new(&scenario.logging, downstream);

    let mut net = build_network(&scenario, Box::new(sink))?;

    println!("Configuration:");
    println!("  Nodes: {}", net.len());
    println!("  Explicit links: {}", scenario.connections.len());
    println!("  Ticks: {} .. {}", scenario.start, scenario.end);
    println!("\nStarting simulation...\n");

    // Scheduled transactions enter the network at their tick
    let mut scheduled = scenario.transactions.clone();
    scheduled.sort_by_key(|tx| tx.at);
    for tx in scheduled {
        net.run_until(tx.at);
        let encoded = Transaction::new(tx.node.clone(), tx.payload).encode();
        net.inject(NodeSignal::new_transaction(tx.node.clone(), encoded), &tx.node)?;
    }
    net.run_until(scenario.end);

    // Print results
    println!("\nNodes at tick {}:", net.tick());
    print_node_table(&net.snapshot());

    println!("\nChain statistics:");
    ChainStatistics::collect(&net).print();

    if let (Some(lines), Some(target)) = (recorded, scenario.record.as_ref()) {
        let mut text = lines.borrow().join("\n");
        text.push('\n');
        fs::write(target, text).map_err(|e| format!("Failed to write {}: {}", target.display(), e))?;
        println!("\nTranscript written to {}", target.display());
    }

    if let Some(report) = report {
        let report = report.borrow();
        println!("\nTranscript comparison: {}", report);
        if let Some((line, expected, actual)) = &report.first_mismatch {
            println!("  first difference at line {}", line);
            println!("    expected: {}", expected);
            println!("    actual:   {}", actual);
        }
        if !report.success() {
            return Err(format!("transcript mismatch in {}", name).into());
        }
    }

    println!("\n✓ Scenario complete!\n");
    Ok(())
}
