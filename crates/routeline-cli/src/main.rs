use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use routeline_core::PipelineConfig;
use routeline_core::app::{AppBuilder, Controller, PipelineContext, WorkerGroup, job_views};
use routeline_core::cache::{LocalBlobCache, SharedCache};
use routeline_core::domain::{DEFAULT_BLOCK_SIZE, partition};
use routeline_core::impls::{InMemoryKv, InMemoryLedger, LocalShare, ProcessEngine};
use routeline_core::ports::{SystemClock, UlidGenerator};
use routeline_core::queue::TaskQueue;

#[derive(Parser, Debug)]
#[command(name = "routeline")]
#[command(version)]
#[command(about = "Discovers measurement files, routes panels and writes their output")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run discovery, admission and workers until Ctrl-C
    Run {
        /// Path to the TOML configuration
        #[arg(long, short)]
        config: PathBuf,
    },

    /// Print how a unit count is split into routing blocks
    Partition {
        units: usize,

        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Run { config } => run(config).await,
        Commands::Partition { units, block_size } => {
            if block_size == 0 {
                return Err("--block-size must be greater than 0".into());
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&partition(units, block_size))?
            );
            Ok(())
        }
    }
}

async fn run(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("routeline=info,routeline_core=info")),
        )
        .init();

    let config = PipelineConfig::load(&config_path)?;
    tracing::info!(
        config = %config_path.display(),
        watches = config.watches.len(),
        design_locations = config.design_locations.len(),
        workers = config.workers,
        "configuration loaded"
    );

    let clock = Arc::new(SystemClock);
    let ids = Arc::new(UlidGenerator::new(SystemClock));
    let kv = Arc::new(InMemoryKv::new(SystemClock));
    let ledger = Arc::new(InMemoryLedger::new());
    config.seed_ledger(ledger.as_ref(), ids.as_ref()).await?;

    let queue = Arc::new(config.task_queue());
    let local = LocalBlobCache::open(
        config.local_cache.dir.clone(),
        config.local_cache.ceiling_bytes,
    )
    .await?;

    let ctx = Arc::new(PipelineContext {
        ledger: ledger.clone(),
        kv: kv.clone(),
        shared: SharedCache::new(kv, config.cache_ttls()),
        local: Arc::new(local),
        share: Arc::new(LocalShare::new(config.share_root.clone())),
        engine: Arc::new(ProcessEngine::new(
            config.engine.program.clone(),
            config.engine.args.clone(),
        )),
        dispatcher: queue.clone(),
        clock,
        ids,
        grammar: config.grammar()?,
        settings: config.settings(),
    });

    let runtime = Arc::new(AppBuilder::pipeline(&ctx)?.build()?);
    let workers = WorkerGroup::spawn(config.workers, queue.clone(), runtime);
    let controller = Controller::spawn(Arc::clone(&ctx), config.tick_interval());

    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl-C, shutting down");

    controller.shutdown_and_join().await;
    workers.shutdown_and_join().await;

    let counts = queue.counts_by_state().await?;
    tracing::info!(
        queued = counts.queued,
        retry_scheduled = counts.retry_scheduled,
        dead = counts.dead,
        "task queue at shutdown"
    );

    let views = job_views(ledger.as_ref()).await?;
    println!("{}", serde_json::to_string_pretty(&views)?);
    Ok(())
}
