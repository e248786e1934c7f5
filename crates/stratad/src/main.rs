//! stratad — the Strata planning daemon.
//!
//! # Usage
//!
//! ```text
//! stratad --config strata.toml run
//! stratad --config strata.toml show --events 20
//! stratad --config strata.toml replay --run-id 20260101T000000.000000Z-0000
//! stratad --config strata.toml route --tables orders,customers
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use strata_core::{QueryRep, StrataConfig};
use strata_metrics::InMemoryMonitor;
use strata_planner::{BlueprintPlanner, replay_run};
use strata_routing::{PolicyCache, Router, StoreAssetLoader};
use strata_state::{EventLog, StateStore};
use strata_transition::{DirectoryActions, StaticDirectory, TransitionCoordinator};
use strata_trigger::TriggerEngine;
use stratad::{FileMetricsProvider, FileWorkloadProvider, PlanningDaemon, open_manager};

#[derive(Parser)]
#[command(name = "stratad", about = "Strata planning daemon")]
struct Cli {
    /// Path to the TOML configuration. Defaults apply when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the planning loop until interrupted.
    Run {
        /// Override `[daemon].tick_s`.
        #[arg(long)]
        tick_s: Option<u64>,
    },
    /// Re-execute a recorded planning run and compare outcomes.
    Replay {
        #[arg(long)]
        run_id: String,
    },
    /// Print the active blueprint, recorded runs and recent events.
    Show {
        /// Number of recent events to print.
        #[arg(long, default_value = "20")]
        events: usize,
    },
    /// Route a read-only query over the given tables under the served blueprint.
    Route {
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,stratad=debug,strata=debug"))?,
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StrataConfig::from_file(path)?,
        None => StrataConfig::default(),
    };

    match cli.command {
        Command::Run { tick_s } => run(config, tick_s).await,
        Command::Replay { run_id } => replay(&config, &run_id),
        Command::Show { events } => show(&config, events),
        Command::Route { tables } => route(&config, tables).await,
    }
}

fn open_store(config: &StrataConfig) -> anyhow::Result<StateStore> {
    let data_dir: &Path = &config.daemon.data_dir;
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join("strata.redb");
    let store = StateStore::open(&path)?;
    info!(path = ?path, "state store opened");
    Ok(store)
}

async fn run(config: StrataConfig, tick_s: Option<u64>) -> anyhow::Result<()> {
    let schema = config.daemon.schema_name.clone();
    info!(%schema, "Strata daemon starting");

    let Some(workload_path) = config.daemon.workload_path.clone() else {
        anyhow::bail!("[daemon].workload_path must be set to run the planning loop");
    };
    let config = Arc::new(config);

    // ── Initialize subsystems ──────────────────────────────────

    let store = open_store(&config)?;
    let events = EventLog::new(&schema, store.clone());

    let manager = Arc::new(open_manager(&config, store.clone(), events.clone())?);
    let versioning = manager.versioning();
    info!(
        version = versioning.version,
        state = %versioning.transition_state,
        "blueprint manager ready"
    );

    let coordinator = Arc::new(TransitionCoordinator::new(
        manager,
        Arc::new(DirectoryActions::new(StaticDirectory::local())),
        events.clone(),
        &config.transition,
    ));

    let monitor = InMemoryMonitor::default();
    let planner = BlueprintPlanner::new(
        config.clone(),
        store,
        events.clone(),
        Arc::new(monitor.clone()),
        Arc::new(FileWorkloadProvider::new(workload_path)),
    );
    let triggers = TriggerEngine::from_config(&config, Arc::new(monitor.clone()), Utc::now());
    info!(triggers = ?triggers.trigger_names(), "trigger engine initialized");

    let mut daemon = PlanningDaemon::new(triggers, planner, coordinator, events);
    match &config.daemon.metrics_path {
        Some(path) => {
            info!(path = ?path, "reading metrics each tick");
            daemon = daemon.with_metrics(Arc::new(FileMetricsProvider::new(path)), monitor);
        }
        None => warn!("[daemon].metrics_path is unset; only time-based and manual triggers can fire"),
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let interval = Duration::from_secs(tick_s.unwrap_or(config.daemon.tick_s));
    daemon.run(interval, shutdown_rx).await;
    daemon.wait_for_cleanup().await?;

    info!("Strata daemon stopped");
    Ok(())
}

fn replay(config: &StrataConfig, run_id: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let schema = &config.daemon.schema_name;
    let events = EventLog::new(schema, store.clone());
    let outcome = replay_run(&store, Some(&events), schema, run_id)?;
    println!("run {run_id} reproduced (digest {})", outcome.digest()?);
    println!("{}", serde_json::to_string_pretty(&outcome.decision)?);
    Ok(())
}

fn show(config: &StrataConfig, limit: usize) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let schema = &config.daemon.schema_name;
    let Some(versioning) = store.get_versioning(schema)? else {
        println!("schema {schema} has no blueprint yet");
        return Ok(());
    };

    println!("{}", serde_json::to_string_pretty(&versioning)?);
    if let Some(bp) = store.get_blueprint(schema, versioning.serving_version())? {
        println!("{}", serde_json::to_string_pretty(&bp)?);
    }

    let runs = store.list_runs(schema)?;
    println!("{} recorded run(s)", runs.len());
    for run_id in runs.iter().rev().take(5) {
        println!("  {run_id}");
    }

    for event in store.list_events(schema, limit)? {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

async fn route(config: &StrataConfig, tables: Vec<String>) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let schema = &config.daemon.schema_name;
    let manager = strata_transition::BlueprintManager::load(schema, store.clone(), EventLog::in_memory(schema))?;

    let blueprint = manager.get_blueprint();
    let mut router = Router::new(
        &blueprint,
        PolicyCache::new(),
        Arc::new(StoreAssetLoader::new(store, schema)),
    );
    let refs: Vec<&str> = tables.iter().map(String::as_str).collect();
    let engine = router.engine_for(&QueryRep::read_only("cli", &refs)).await?;
    println!("{engine}");
    Ok(())
}
