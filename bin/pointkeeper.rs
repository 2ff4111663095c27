use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use pointkeeper::{ChainManager, LedgerStore, PointsScheduler, PostgresClient, Settings};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to initialize logger")?;

    // Config path without extension, the loader picks the format
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config".to_string());

    let settings = Settings::new(&config_path)
        .context("Failed to load configuration. Please ensure it exists and is valid")?;

    let postgres = PostgresClient::new(settings.postgres.clone())
        .await
        .context("Failed to initialize database connection")?;
    postgres
        .migrate()
        .await
        .context("Failed to apply database schema")?;

    let store: Arc<dyn LedgerStore> = Arc::new(postgres);

    run(settings, store).await
}

async fn run(settings: Settings, store: Arc<dyn LedgerStore>) -> anyhow::Result<()> {
    // Every chain must come up before anything runs
    let chain_manager = ChainManager::connect(&settings.chains, store.clone())
        .await
        .context("Failed to start chain indexers")?;

    let points_scheduler = PointsScheduler::new(store.clone(), &settings.points)
        .context("Failed to configure points scheduler")?;

    let cancellation_token = CancellationToken::new();

    let chain_manager_token = cancellation_token.child_token();
    let chain_manager_handle = tokio::spawn(async move {
        if let Err(e) = chain_manager.run(chain_manager_token).await {
            error!("Chain manager failed: {:#}", e);
        }
    });

    info!("Chain manager started with {} chain(s)", settings.chains.len());

    let scheduler_token = cancellation_token.child_token();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = points_scheduler.run(scheduler_token).await {
            error!("Points scheduler failed: {:#}", e);
        }
    });

    info!("Points scheduler started");

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Pointkeeper running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Finishing all tasks...");

    cancellation_token.cancel();

    info!("Waiting for chain manager to stop...");
    let _ = chain_manager_handle.await;

    info!("Waiting for points scheduler to stop...");
    let _ = scheduler_handle.await;

    info!("Shutdown complete");
    Ok(())
}
