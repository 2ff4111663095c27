use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::sol_types::SolEvent;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use moka::future::Cache;
use num_bigint::BigUint;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use crate::abis::Transfer;
use crate::config::ChainSettings;
use crate::db::models::{BalanceChange, ChainRecord};
use crate::db::LedgerStore;
use crate::rpc::ChainRpc;
use crate::utils::{format_units, u256_to_biguint};
use crate::worker::parser::{self, TransferLog};
use crate::worker::token_reader::{TokenMetadata, TokenReader};

/// Number of block timestamps kept per chain.
const BLOCK_TIMESTAMP_CACHE_SIZE: u64 = 10_000;

/// Highest block that is old enough to index, `None` while the chain is
/// shorter than the confirmation depth.
pub fn safe_block(head: u64, confirmations: u64) -> Option<u64> {
    if head <= confirmations {
        None
    } else {
        Some(head - confirmations)
    }
}

/// Result of one polling iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing new behind the confirmation depth.
    Idle,
    /// The cursor moved to the given block.
    Advanced(u64),
}

/// Indexer for the tracked token on a single chain.
///
/// Follows the chain `confirmations` blocks behind head, turns every
/// `Transfer` into two balance change rows (one per party) carrying the
/// party's balance read at the log's block, and commits each block chunk
/// together with the cursor as one unit.
pub struct ChainWorker {
    name: String,
    chain_id: u64,
    contract: Address,
    start_block: u64,
    confirmations: u64,
    backfill_blocks: u64,
    max_block_range: u64,
    poll_interval: Duration,
    rpc: Arc<dyn ChainRpc>,
    store: Arc<dyn LedgerStore>,
    token: TokenReader,
    metadata: TokenMetadata,
    block_timestamps: Cache<u64, DateTime<Utc>>,
}

impl ChainWorker {
    /// Verify the node serves the configured chain and read token metadata.
    /// Nothing is written to the ledger until [`ChainWorker::register`].
    pub async fn new(
        config: &ChainSettings,
        rpc: Arc<dyn ChainRpc>,
        store: Arc<dyn LedgerStore>,
    ) -> Result<Self> {
        let contract = config.contract_address()?;

        let reported = rpc
            .chain_id()
            .await
            .with_context(|| format!("Failed to query chain id for {}", config.name))?;
        if reported != config.chain_id {
            bail!(
                "Chain {} is configured as chain id {} but the RPC endpoint reports {}",
                config.name,
                config.chain_id,
                reported
            );
        }

        let token = TokenReader::new(rpc.clone(), contract);
        let metadata = token.metadata().await;

        info!(
            "Chain {} ({}): tracking {} at {} ({} decimals)",
            config.name, config.chain_id, metadata.symbol, contract, metadata.decimals
        );

        Ok(Self {
            name: config.name.clone(),
            chain_id: config.chain_id,
            contract,
            start_block: config.start_block,
            confirmations: config.confirmations,
            backfill_blocks: config.backfill_blocks,
            max_block_range: config.max_block_range.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_milliseconds),
            rpc,
            store,
            token,
            metadata,
            block_timestamps: Cache::builder()
                .max_capacity(BLOCK_TIMESTAMP_CACHE_SIZE)
                .build(),
        })
    }

    /// Record the chain's name and contract in the ledger.
    pub async fn register(&self) -> Result<()> {
        self.store
            .register_chain(&ChainRecord::new(self.chain_id, &self.name, self.contract))
            .await
            .with_context(|| format!("Failed to register chain {}", self.name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Last block considered processed when the worker starts: the stored
    /// cursor, else the block before `start_block`, else `backfill_blocks`
    /// behind the current head.
    pub async fn resolve_start(&self) -> Result<u64> {
        if let Some(cursor) = self.store.get_cursor(self.chain_id).await? {
            return Ok(cursor.last_processed_block);
        }

        if self.start_block > 0 {
            return Ok(self.start_block - 1);
        }

        let head = self.rpc.head_block_number().await?;
        Ok(head.saturating_sub(self.backfill_blocks))
    }

    /// Process everything between `cursor` and the current safe block.
    pub async fn poll_once(&self, cursor: &mut u64) -> Result<PollOutcome> {
        let head = self
            .rpc
            .head_block_number()
            .await
            .context("Failed to fetch head block")?;

        let Some(safe) = safe_block(head, self.confirmations) else {
            return Ok(PollOutcome::Idle);
        };
        if *cursor >= safe {
            return Ok(PollOutcome::Idle);
        }

        self.process_range(cursor, safe).await?;
        Ok(PollOutcome::Advanced(*cursor))
    }

    /// Index `(cursor, end]` chunk by chunk. `cursor` follows every committed
    /// chunk, so a failure part-way leaves it at the last committed block.
    pub async fn process_range(&self, cursor: &mut u64, end: u64) -> Result<()> {
        while *cursor < end {
            let from = *cursor + 1;
            let to = end.min(from.saturating_add(self.max_block_range - 1));

            self.process_chunk(from, to).await?;
            *cursor = to;
        }
        Ok(())
    }

    async fn process_chunk(&self, from: u64, to: u64) -> Result<()> {
        let logs = self
            .rpc
            .filter_logs(from, to, self.contract, Transfer::SIGNATURE_HASH)
            .await
            .with_context(|| format!("Failed to fetch logs for blocks {}-{}", from, to))?;

        let parsed = parser::parse_logs(logs);

        let mut balances: FxHashMap<(Address, u64), BigUint> = FxHashMap::default();
        let mut changes = Vec::with_capacity(parsed.transfers.len() * 2);

        for transfer in &parsed.transfers {
            let created_at = self.block_timestamp(transfer.block_number).await?;

            for party in [transfer.from, transfer.to] {
                let balance_after = self
                    .balance_at(&mut balances, party, transfer.block_number)
                    .await?;
                changes.push(self.change_row(transfer, party, balance_after, created_at));
            }
        }

        let inserted = self
            .store
            .commit_range(self.chain_id, to, &changes)
            .await
            .with_context(|| format!("Failed to commit blocks {}-{}", from, to))?;

        if !parsed.transfers.is_empty() || parsed.skipped > 0 {
            let volume: BigUint = parsed
                .transfers
                .iter()
                .map(|t| u256_to_biguint(t.value))
                .sum();
            info!(
                "Chain {} ({}): blocks {}-{} -> {} transfers ({} {}), {} new change rows, {} skipped logs",
                self.name,
                self.chain_id,
                from,
                to,
                parsed.transfers.len(),
                format_units(&volume, self.metadata.decimals),
                self.metadata.symbol,
                inserted,
                parsed.skipped
            );
        }

        Ok(())
    }

    fn change_row(
        &self,
        transfer: &TransferLog,
        party: Address,
        balance_after: BigUint,
        created_at: DateTime<Utc>,
    ) -> BalanceChange {
        BalanceChange {
            chain_id: self.chain_id,
            address: party,
            tx_hash: transfer.tx_hash,
            log_index: transfer.log_index,
            block_number: transfer.block_number,
            change_amount: u256_to_biguint(transfer.value),
            balance_after,
            event_type: transfer.event_type,
            created_at,
        }
    }

    /// Ground-truth balance of `party` after `block`. The zero address is
    /// never queried.
    async fn balance_at(
        &self,
        seen: &mut FxHashMap<(Address, u64), BigUint>,
        party: Address,
        block: u64,
    ) -> Result<BigUint> {
        if party == Address::ZERO {
            return Ok(BigUint::default());
        }
        if let Some(balance) = seen.get(&(party, block)) {
            return Ok(balance.clone());
        }

        let balance = u256_to_biguint(self.token.balance_of(party, block).await?);
        seen.insert((party, block), balance.clone());
        Ok(balance)
    }

    async fn block_timestamp(&self, block: u64) -> Result<DateTime<Utc>> {
        if let Some(ts) = self.block_timestamps.get(&block).await {
            return Ok(ts);
        }

        let secs = self
            .rpc
            .block_timestamp(block)
            .await
            .with_context(|| format!("Failed to fetch timestamp of block {}", block))?;
        let ts = i64::try_from(secs)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .with_context(|| format!("Block {} has an invalid timestamp {}", block, secs))?;

        self.block_timestamps.insert(block, ts).await;
        Ok(ts)
    }

    /// Sleep one poll interval. Returns `true` when cancelled instead.
    async fn sleep(&self, cancellation_token: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancellation_token.cancelled() => true,
            _ = tokio::time::sleep(self.poll_interval) => false,
        }
    }

    /// Index until cancelled. Cancellation is only observed between
    /// iterations, so a chunk in progress always finishes or fails as a whole.
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<()> {
        let mut failures: u64 = 0;

        let mut cursor = loop {
            if cancellation_token.is_cancelled() {
                return Ok(());
            }
            match self.resolve_start().await {
                Ok(cursor) => break cursor,
                Err(e) => {
                    failures += 1;
                    error!(
                        "Chain {} ({}): failed to resolve start block (attempt {}): {:#}",
                        self.name, self.chain_id, failures, e
                    );
                    if self.sleep(&cancellation_token).await {
                        return Ok(());
                    }
                },
            }
        };

        info!(
            "Chain {} ({}): indexing from block {} with {} confirmations",
            self.name,
            self.chain_id,
            cursor + 1,
            self.confirmations
        );
        failures = 0;

        loop {
            if cancellation_token.is_cancelled() {
                break;
            }

            match self.poll_once(&mut cursor).await {
                Ok(PollOutcome::Advanced(block)) => {
                    failures = 0;
                    info!(
                        "Chain {} ({}): processed up to block {}",
                        self.name, self.chain_id, block
                    );
                    // Head may have moved while the range was processed
                    continue;
                },
                Ok(PollOutcome::Idle) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Chain {} ({}): poll failed at cursor {} (attempt {}), retrying in {:?}: {:#}",
                        self.name, self.chain_id, cursor, failures, self.poll_interval, e
                    );
                },
            }

            if self.sleep(&cancellation_token).await {
                break;
            }
        }

        info!(
            "Chain {} ({}): stopped at block {}",
            self.name, self.chain_id, cursor
        );
        Ok(())
    }
}
