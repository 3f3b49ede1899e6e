//! MarketView simulation CLI
//!
//! Runs viewer scenarios on virtual time and reports invariant violations.

use clap::Parser;
use marketview_sim::{ScenarioId, ScenarioResult, ScenarioRunner};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// MarketView Simulator - deterministic viewer stress tests
#[derive(Parser, Debug)]
#[command(name = "marketview-sim")]
#[command(about = "Deterministic simulation tests for the MarketView viewer")]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Initial number of market agents
    #[arg(short, long, default_value = "60")]
    agents: usize,

    /// Scenario to run (steady, jitter, burst, blackout, churn, resize, malformed, group_filter, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulated duration in seconds
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export captured frames of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Capture every Nth frame when exporting
    #[arg(long, default_value = "6")]
    export_every: u64,

    /// Stream a single scenario to a Rerun viewer
    #[cfg(feature = "visualization")]
    #[arg(long)]
    rerun: bool,
}

fn main() {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("MarketView Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                std::process::exit(1);
            }
        }
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }
        let scenario = scenarios[0];
        info!("Running {} with export to: {}", scenario, export_path);

        let runner = ScenarioRunner::new(base_seed, args.agents).with_duration(args.duration);
        let (result, export) = runner.run_with_export(scenario, args.export_every);
        if let Err(e) = export.write_to_file(export_path) {
            error!("Could not write {}: {}", export_path, e);
            std::process::exit(1);
        }

        report(&result);
        info!("Exported {} frames to {}", export.frames.len(), export_path);
        if !result.passed {
            std::process::exit(1);
        }
        return;
    }

    #[cfg(feature = "visualization")]
    {
        if args.rerun {
            run_rerun(&args, &scenarios, base_seed);
            return;
        }
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed, args.agents).with_duration(args.duration);

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "frames": r.total_frames,
                    "time_secs": r.final_time_secs,
                    "entities": r.final_entity_count,
                    "snapshots_pushed": r.metrics.snapshots_pushed,
                    "skipped_snapshots": r.metrics.skipped_snapshots,
                    "rejected": r.metrics.rejected,
                    "flashes_drawn": r.metrics.flashes_drawn,
                    "max_lag": r.metrics.max_lag,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Could not encode summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if failed_count > 0 {
        std::process::exit(1);
    }
}

fn report(result: &ScenarioResult) {
    let m = &result.metrics;
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED: {} frames, {} snapshots ({} skipped), {} flashes, max lag {:.1}",
            result.scenario.name(),
            result.seed,
            result.total_frames,
            m.snapshots_pushed,
            m.skipped_snapshots,
            m.flashes_drawn,
            m.max_lag
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

#[cfg(feature = "visualization")]
fn run_rerun(args: &Args, scenarios: &[ScenarioId], seed: u64) {
    use marketview_core::RerunSink;

    if scenarios.len() > 1 {
        eprintln!("Error: --rerun only supports a single scenario, not 'all'");
        std::process::exit(1);
    }
    let sink = match RerunSink::spawn("marketview-sim") {
        Ok(sink) => sink,
        Err(e) => {
            error!("Could not start Rerun: {}", e);
            std::process::exit(1);
        }
    };

    let runner = ScenarioRunner::new(seed, args.agents).with_duration(args.duration);
    let result = runner.run_on(scenarios[0], Box::new(sink));
    report(&result);
    if !result.passed {
        std::process::exit(1);
    }
}
