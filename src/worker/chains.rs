use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ChainSettings;
use crate::db::LedgerStore;
use crate::rpc::{ChainRpc, RpcClient};
use crate::worker::ChainWorker;

/// Represents a running chain indexer
struct RunningChain {
    name: String,
    chain_id: u64,
    handle: JoinHandle<()>,
}

/// Owns one indexer per configured chain.
///
/// Construction is all-or-nothing: every chain must connect and report the
/// configured chain id, otherwise no fleet is created and no chain is
/// registered in the ledger. Once started, every
/// worker runs as its own task under one shared cancellation token.
pub struct ChainManager {
    pending: Vec<ChainWorker>,
    running: Vec<RunningChain>,
    cancellation_token: Option<CancellationToken>,
}

impl ChainManager {
    /// Build every worker, connecting through `connect`.
    pub async fn new<F>(
        configs: &[ChainSettings],
        store: Arc<dyn LedgerStore>,
        connect: F,
    ) -> Result<Self>
    where
        F: Fn(&ChainSettings) -> Result<Arc<dyn ChainRpc>>,
    {
        let mut seen = HashSet::new();
        for config in configs {
            if !seen.insert(config.chain_id) {
                bail!(
                    "Chain id {} is configured more than once ({})",
                    config.chain_id,
                    config.name
                );
            }
        }

        let mut pending = Vec::with_capacity(configs.len());
        for config in configs {
            let rpc = connect(config).with_context(|| {
                format!(
                    "Failed to connect to chain {} ({})",
                    config.name, config.chain_id
                )
            })?;

            let worker = ChainWorker::new(config, rpc, store.clone())
                .await
                .with_context(|| {
                    format!(
                        "Failed to initialize worker for chain {} ({}). Check the RPC URL.",
                        config.name, config.chain_id
                    )
                })?;

            info!(
                "Worker initialized successfully for chain {} ({})",
                config.name, config.chain_id
            );
            pending.push(worker);
        }

        for worker in &pending {
            worker.register().await?;
        }

        Ok(Self {
            pending,
            running: Vec::new(),
            cancellation_token: None,
        })
    }

    /// Build every worker over JSON-RPC/HTTP.
    pub async fn connect(configs: &[ChainSettings], store: Arc<dyn LedgerStore>) -> Result<Self> {
        Self::new(configs, store, |config| {
            let client = RpcClient::new(&config.rpc_url)?;
            Ok(Arc::new(client) as Arc<dyn ChainRpc>)
        })
        .await
    }

    /// Number of workers in the fleet.
    pub fn len(&self) -> usize {
        self.pending.len() + self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn every worker as an independent task.
    pub fn start(&mut self, cancellation_token: CancellationToken) {
        for worker in self.pending.drain(..) {
            let name = worker.name().to_string();
            let chain_id = worker.chain_id();
            let worker_token = cancellation_token.clone();
            let task_name = name.clone();

            let handle = tokio::spawn(async move {
                if let Err(e) = worker.run(worker_token).await {
                    error!("Worker for {} failed: {:#}", task_name, e);
                }
            });

            info!("Chain {} ({}) indexer started", name, chain_id);
            self.running.push(RunningChain {
                name,
                chain_id,
                handle,
            });
        }

        self.cancellation_token = Some(cancellation_token);
    }

    /// Cancel every worker and wait until all of them stopped.
    pub async fn shutdown(&mut self) {
        if let Some(token) = &self.cancellation_token {
            token.cancel();
        }

        info!("ChainManager: Stopping {} chain indexer(s)...", self.running.len());
        for running in self.running.drain(..) {
            match running.handle.await {
                Ok(()) => info!(
                    "Indexer for chain {} ({}) stopped gracefully",
                    running.name, running.chain_id
                ),
                Err(e) => warn!(
                    "Indexer for chain {} ({}) terminated abnormally: {}",
                    running.name, running.chain_id, e
                ),
            }
        }

        info!("ChainManager: Shutdown complete");
    }

    /// Start the fleet, wait for cancellation, then wait for every worker.
    pub async fn run(mut self, cancellation_token: CancellationToken) -> Result<()> {
        self.start(cancellation_token.clone());

        cancellation_token.cancelled().await;
        info!("ChainManager: Received cancellation signal");

        self.shutdown().await;
        Ok(())
    }
}
