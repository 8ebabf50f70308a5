//! # tabcast demo
//!
//! Spins up several instances over one in-memory bus.
//!
//! ## Scenario
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. N instances start, each with its own MemoryStore                    │
//! │  2. Leader election settles on one instance                             │
//! │  3. Every instance pushes a todo; all lists converge                    │
//! │  4. The leader shuts down; a new leader is elected at once              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ```text
//! RUST_LOG=info,tabcast=debug tabcast-demo --instances 4 --full-mesh --election
//! ```

mod todos;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tabcast_core::{Envelope, ModuleDeclaration};
use tabcast_sync::transport::memory::MemoryBus;
use tabcast_sync::{
    ContextKind, DeliveryMode, MemoryStore, SyncAgent, SyncAgentHandle, SyncConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ts_rs::TS;

use crate::todos::{Todo, Todos};

/// Slack added to election timings before inspecting the outcome.
const SETTLE: Duration = Duration::from_millis(200);

#[derive(Debug, Parser)]
#[command(name = "tabcast-demo", about = "Multi-instance tabcast demonstration")]
struct Args {
    /// Number of instances to start.
    #[arg(short = 'n', long, default_value_t = 3)]
    instances: usize,

    /// Path to a sync.toml; defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Deliver every frame to its sender too.
    #[arg(long)]
    full_mesh: bool,

    /// Run with leader election regardless of the loaded config.
    #[arg(long, conflicts_with = "no_election")]
    election: bool,

    /// Run without leader election regardless of the loaded config.
    #[arg(long)]
    no_election: bool,

    /// Write TypeScript wire types to this directory and exit.
    #[arg(long, value_name = "DIR")]
    export_types: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    if let Some(dir) = args.export_types {
        Envelope::export_all_to(&dir)?;
        info!(?dir, "TypeScript bindings written");
        return Ok(());
    }

    let config = demo_config(&args)?;
    let bus = MemoryBus::new();

    let mut instances = Vec::with_capacity(args.instances);
    for _ in 0..args.instances {
        let store = MemoryStore::new().with_module("todos", Todos::default())?;
        let handle = SyncAgent::init(config.clone(), store, bus.transport(ContextKind::Window))?.spawn();
        info!(identity = %handle.identity(), "Instance started");
        instances.push(handle);
    }

    if config.is_election_enabled() {
        tokio::time::sleep(config.election.response_time() + SETTLE).await;
        report_leader(&instances);
    }

    for (index, handle) in instances.iter().enumerate() {
        let id = format!("{}-{}", handle.identity(), index);
        handle
            .commit("todos/pushTodo", Todo::payload(&id, &format!("todo from instance {index}")))
            .await?;
    }
    tokio::time::sleep(SETTLE).await;

    for handle in &instances {
        let state = handle.module_state("todos").await?.unwrap_or_default();
        let status = handle.status();
        info!(
            identity = %handle.identity(),
            leader = status.is_leader,
            broadcast = status.broadcast,
            applied = status.applied,
            suppressed = status.suppressed,
            todos = %state["items"],
            "Instance state"
        );
    }
    info!(frames = bus.posted("todos"), "Frames posted on 'todos'");

    if config.is_election_enabled() {
        if let Some(position) = instances.iter().position(SyncAgentHandle::is_leader) {
            let leader = instances.remove(position);
            info!(identity = %leader.identity(), "Shutting down the leader");
            leader.shutdown().await?;

            tokio::time::sleep(config.election.response_time() + SETTLE).await;
            report_leader(&instances);
        }
    }

    for handle in &instances {
        handle.shutdown().await?;
    }
    info!("Demo finished");
    Ok(())
}

/// Loads the config and makes sure the demo's `todos` module is shared.
fn demo_config(args: &Args) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    let mut config = SyncConfig::load(args.config.clone())?;
    apply_args(&mut config, args);
    config.validate()?;
    Ok(config)
}

/// Layers the command-line flags over a loaded config. Flags that are not
/// given leave the config untouched.
fn apply_args(config: &mut SyncConfig, args: &Args) {
    if !config.modules.contains("todos") {
        config
            .modules
            .insert("todos", ModuleDeclaration::broadcast(todos::MUTATIONS));
    }
    if args.full_mesh {
        config.channel.mode = DeliveryMode::FullMesh;
    }
    if args.election {
        config.election.enabled = true;
    }
    if args.no_election {
        config.election.enabled = false;
    }
}

fn report_leader(instances: &[SyncAgentHandle]) {
    let leaders: Vec<String> = instances
        .iter()
        .filter(|handle| handle.is_leader())
        .map(|handle| handle.identity().to_string())
        .collect();

    match leaders.as_slice() {
        [leader] => info!(leader = %leader, "Leader elected"),
        [] => warn!("No leader yet"),
        many => warn!(leaders = ?many, "More than one leader"),
    }
}

/// Initializes tracing with `RUST_LOG`, falling back to a default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tabcast=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
