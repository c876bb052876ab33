use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use routerops::config::ServerConfig;
use routerops::db::artifacts::FsArtifactStore;
use routerops::db::inventory::InventoryFile;
use routerops::db::memory::MemoryStore;
use routerops::db::{ArtifactStore, DeviceDirectory, TaskStore};
use routerops::scheduler::{DeviceTaskRunner, Dispatcher, Scheduler};
use routerops::transport::ConnectionGate;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Path to a JSON inventory seeding devices, groups and tasks
    #[arg(short, long)]
    inventory: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "routerops.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false) // No ANSI colors in file
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = ServerConfig::load(args.config.as_deref())?;
    init_logging(&config.log_dir);
    info!("Starting task scheduler daemon.");

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = args.inventory.as_deref().or(config.inventory_file.as_deref()) {
        let inventory = InventoryFile::load(Path::new(path)).await?;
        inventory.apply(&store).await;
        info!(path, "Inventory loaded.");
    }

    let task_store: Arc<dyn TaskStore> = store.clone();
    let directory: Arc<dyn DeviceDirectory> = store.clone();
    let artifacts: Arc<dyn ArtifactStore> =
        Arc::new(FsArtifactStore::new(&config.backup_storage_root));

    let gate = ConnectionGate::new(config.max_parallel_connections);
    let runner = Arc::new(DeviceTaskRunner::new(
        directory.clone(),
        artifacts,
        gate,
        config.transport(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        task_store.clone(),
        directory,
        runner,
        config.scheduler_lookahead_minutes,
    ));
    let scheduler = Arc::new(Scheduler::new(
        task_store,
        dispatcher,
        config.scheduler_interval(),
        config.scheduler_lookahead_minutes,
    ));
    let handle = scheduler.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping scheduler.");
    handle.stop().await;
    info!("Scheduler stopped cleanly.");
    Ok(())
}
