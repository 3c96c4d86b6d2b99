//! VIGIL - Rule-Based Stream Processing Engine
//!
//! Compiles declarative sensor rules into a fixed-period runtime and tests
//! them black-box through the shared key/value store.
//!
//! # Usage
//!
//! ```bash
//! # Derive test scenarios from a rule document
//! vigil generate rules.yaml -o scenarios.json
//!
//! # Run scenarios against an in-process engine
//! vigil run rules.yaml scenarios.json -o results.json
//!
//! # Render a report from the results
//! vigil report results.json --format html -o report.html
//!
//! # Run the engine standalone against a sled store
//! vigil serve rules.yaml --store-path vigil-db
//! ```
//!
//! # Environment Variables
//!
//! - `VIGIL_CONFIG`: path to a TOML configuration file
//! - `VIGIL_CYCLE_PERIOD_MS`, `VIGIL_BUFFER_CAPACITY`, multipliers: see config
//! - `RUST_LOG`: logging level (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil::config::Config;
use vigil::engine::Engine;
use vigil::rules;
use vigil::store::{MemoryStore, SensorStore, SledStore};
use vigil::tester::{self, report::ReportFormat, ScenarioDocument, ScenarioRunner};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Rule-based sensor stream processing engine and tester")]
#[command(version)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Derive test scenarios from a rule document
    Generate {
        /// Path to the YAML rule document
        rules: PathBuf,
        /// Output path for the scenario document
        #[arg(short, long, default_value = "scenarios.json")]
        out: PathBuf,
    },
    /// Run scenarios against an in-process engine
    Run {
        /// Path to the YAML rule document
        rules: PathBuf,
        /// Path to the scenario document
        scenarios: PathBuf,
        /// Output path for the result document
        #[arg(short, long, default_value = "results.json")]
        out: PathBuf,
        /// Back the engine with a sled store at this path instead of memory
        #[arg(long)]
        store_path: Option<PathBuf>,
    },
    /// Render a report from a result document
    Report {
        /// Path to the result document
        results: PathBuf,
        /// Output format: text, markdown, or html
        #[arg(short, long, default_value = "text")]
        format: ReportFormat,
        /// Output path; prints to stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Run the engine standalone until interrupted
    Serve {
        /// Path to the YAML rule document
        rules: PathBuf,
        /// Sled store path (default: from config, else ./vigil-db)
        #[arg(long)]
        store_path: Option<PathBuf>,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let config = Config::load().context("Failed to load configuration")?;

    match args.command {
        Command::Generate { rules, out } => generate(&config, &rules, &out),
        Command::Run {
            rules,
            scenarios,
            out,
            store_path,
        } => run(&config, &rules, &scenarios, &out, store_path).await,
        Command::Report { results, format, out } => report(&results, format, out.as_deref()),
        Command::Serve { rules, store_path } => serve(&config, &rules, store_path).await,
    }
}

// ============================================================================
// Subcommands
// ============================================================================

fn generate(config: &Config, rules_path: &PathBuf, out: &PathBuf) -> Result<()> {
    let rule_set = rules::load_path(rules_path)
        .with_context(|| format!("Failed to load rules from {}", rules_path.display()))?;
    let plan = rules::plan(&rule_set, config.engine.cycle_period_ms)
        .context("Rule set cannot be scheduled")?;

    let output = tester::synthesize(&rule_set, &plan, config.engine.cycle_period_ms);
    for warning in &output.warnings {
        warn!("synthesis: {}", warning);
    }

    let json = serde_json::to_string_pretty(&output.document)?;
    std::fs::write(out, json)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    info!(
        "Wrote {} scenario(s) to {} ({} warning(s))",
        output.document.scenarios.len(),
        out.display(),
        output.warnings.len()
    );
    Ok(())
}

async fn run(
    config: &Config,
    rules_path: &PathBuf,
    scenarios_path: &PathBuf,
    out: &PathBuf,
    store_path: Option<PathBuf>,
) -> Result<()> {
    let rule_set = rules::load_path(rules_path)
        .with_context(|| format!("Failed to load rules from {}", rules_path.display()))?;
    let raw = std::fs::read_to_string(scenarios_path)
        .with_context(|| format!("Failed to read {}", scenarios_path.display()))?;
    let document: ScenarioDocument =
        serde_json::from_str(&raw).context("Scenario document is not valid JSON")?;

    let store: Arc<dyn SensorStore> = match store_path {
        Some(path) => Arc::new(SledStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };

    let engine = Engine::new(rule_set, config.engine.clone(), Arc::clone(&store))
        .context("Engine refused the rule set")?;
    let cancel = CancellationToken::new();
    let engine_handle = tokio::spawn(engine.run(cancel.clone()));

    let runner = ScenarioRunner::new(Arc::clone(&store), config.tester.clone());
    let results = runner.run_document(&document).await;

    cancel.cancel();
    if let Ok(stats) = engine_handle.await {
        info!(
            "Engine: {} cycle(s), {} overrun(s), {} output write(s)",
            stats.cycles_run, stats.overruns, stats.outputs_written
        );
    }

    let json = serde_json::to_string_pretty(&results)?;
    std::fs::write(out, json).with_context(|| format!("Failed to write {}", out.display()))?;
    info!(
        "{} scenario(s): {} passed, {} failed; results in {}",
        results.results.len(),
        results.passed_count(),
        results.failed_count(),
        out.display()
    );

    if !results.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

fn report(results_path: &PathBuf, format: ReportFormat, out: Option<&std::path::Path>) -> Result<()> {
    let raw = std::fs::read_to_string(results_path)
        .with_context(|| format!("Failed to read {}", results_path.display()))?;
    let results: tester::ResultDocument =
        serde_json::from_str(&raw).context("Result document is not valid JSON")?;

    let rendered = tester::render(&results, format);
    match out {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{rendered}"),
    }

    if !results.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

async fn serve(config: &Config, rules_path: &PathBuf, store_path: Option<PathBuf>) -> Result<()> {
    let rule_set = rules::load_path(rules_path)
        .with_context(|| format!("Failed to load rules from {}", rules_path.display()))?;

    let path = store_path
        .or_else(|| config.engine.store_path.clone())
        .unwrap_or_else(|| PathBuf::from("vigil-db"));
    let store: Arc<dyn SensorStore> = Arc::new(SledStore::open(&path)?);

    let engine = Engine::new(rule_set, config.engine.clone(), Arc::clone(&store))
        .context("Engine refused the rule set")?;
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            shutdown.cancel();
        }
    });

    let stats = engine.run(cancel).await;
    info!(
        "Engine stopped after {} cycle(s) ({} overrun(s))",
        stats.cycles_run, stats.overruns
    );
    Ok(())
}
