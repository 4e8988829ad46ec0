//! Chorus DST Simulator CLI
//!
//! Run deterministic fault scenarios against the role assignment and
//! dispatch protocol.

use chorus_core::{ChorusConfig, StaticModuleLoader};
use chorus_sim::{unservable_roles, ScenarioId, ScenarioResult, ScenarioRunner};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Chorus Deterministic Simulation Testing CLI
#[derive(Parser, Debug)]
#[command(name = "chorus-sim")]
#[command(about = "Run deterministic simulation tests for Chorus", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,
    
    /// Scenario to run (nominal, silent_peer, crashed_worker, shutdown_drain,
    /// lossy_link, surplus_peers, scarce_peers, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,
    
    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,
    
    /// JSON protocol configuration (topic, retry budget, roles).
    ///
    /// Simulated workers only load the built-in `diagnostics` module, so the
    /// file should list its roles explicitly; the stock role list is refused.
    #[arg(short, long)]
    config: Option<PathBuf>,
    
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
    
    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

fn scenario_names() -> String {
    ScenarioId::all()
        .iter()
        .map(|s| s.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn main() {
    let args = Args::parse();
    
    // RUST_LOG wins over --verbose
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    
    if !args.json {
        info!("Chorus DST Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
    
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match ScenarioId::from_name(&args.scenario) {
            Some(scenario) => vec![scenario],
            None => {
                eprintln!("Error: unknown scenario '{}'", args.scenario);
                eprintln!("Available scenarios: {}, all", scenario_names());
                std::process::exit(2);
            }
        }
    };
    
    let config = match &args.config {
        Some(path) => match ChorusConfig::from_file(path) {
            Ok(config) => {
                let loader = StaticModuleLoader::with_builtins();
                let unservable = unservable_roles(&config, &loader);
                if !unservable.is_empty() {
                    let available: Vec<&str> = loader.module_names().collect();
                    eprintln!(
                        "Error: roles {:?} in {} name no module the simulator provides (available: {})",
                        unservable,
                        path.display(),
                        available.join(", ")
                    );
                    std::process::exit(2);
                }
                Some(config)
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(2);
            }
        },
        None => None,
    };
    
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };
    
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;
    
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        
        let mut runner = ScenarioRunner::new(seed);
        if let Some(config) = &config {
            runner = runner.with_config(config.clone());
        }
        
        for scenario in &scenarios {
            let result = runner.run(*scenario);
            
            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED in {}ms virtual | {} sent, {} dropped",
                        scenario.name(),
                        seed,
                        result.virtual_time_ms,
                        result.metrics.packets.sent,
                        result.metrics.packets.dropped
                    );
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
            
            if !result.passed {
                failed_count += 1;
            }
            
            all_results.push(result);
        }
    }
    
    let total = all_results.len();
    let passed = total - failed_count;
    
    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: failed to encode results: {}", e);
                std::process::exit(2);
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        
        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            
            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }
    
    if failed_count > 0 {
        std::process::exit(1);
    }
}
