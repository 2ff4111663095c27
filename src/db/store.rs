//! The ledger storage contract shared by the indexer and the accrual engine.

use alloy::primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;

use crate::db::models::{
    AccountAward, AccountBalance, BalanceChange, ChainCursor, ChainRecord, PointsCalculation,
};

/// Durable keyed storage for cursors, balances, the balance change log, point
/// totals and the points audit trail.
///
/// Implementations: [`PostgresClient`](crate::db::PostgresClient) and
/// [`InMemoryLedger`](crate::db::InMemoryLedger).
///
/// Writes that must land together are exposed as single operations
/// ([`commit_range`](LedgerStore::commit_range),
/// [`apply_awards`](LedgerStore::apply_awards)); implementations apply them
/// all-or-nothing.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ==================== CHAINS ====================

    /// Insert or refresh a chain's name and contract. Never touches the cursor.
    async fn register_chain(&self, chain: &ChainRecord) -> Result<()>;

    /// All chain ids known to the ledger.
    async fn get_chain_ids(&self) -> Result<Vec<u64>>;

    /// Last fully processed block, `None` until the first range commits.
    async fn get_cursor(&self, chain_id: u64) -> Result<Option<ChainCursor>>;

    /// Move the cursor forward. A lower block than the stored one is ignored.
    async fn set_cursor(&self, cursor: &ChainCursor) -> Result<()>;

    // ==================== BALANCES ====================

    async fn get_balance(&self, chain_id: u64, address: Address) -> Result<Option<BigUint>>;

    /// Overwrite an account's balance.
    async fn set_balance(&self, balance: &AccountBalance) -> Result<()>;

    /// Append one change row. Returns `false` when the row was already recorded.
    async fn append_balance_change(&self, change: &BalanceChange) -> Result<bool>;

    /// Record a processed block range atomically: overwrite the balance of
    /// every non-zero party with its `balance_after` (in order), append the
    /// change rows, then advance the cursor to `end_block`.
    ///
    /// Returns the number of change rows that were new.
    async fn commit_range(
        &self,
        chain_id: u64,
        end_block: u64,
        changes: &[BalanceChange],
    ) -> Result<usize>;

    /// Every change row of a chain ordered by address, then time
    /// (ties by block number and log index).
    async fn get_balance_changes(&self, chain_id: u64) -> Result<Vec<BalanceChange>>;

    // ==================== POINTS ====================

    /// Current point total, zero for unknown accounts.
    async fn get_total_points(&self, chain_id: u64, address: Address) -> Result<BigUint>;

    async fn set_total_points(
        &self,
        chain_id: u64,
        address: Address,
        total_points: &BigUint,
    ) -> Result<()>;

    /// Most recent `calculated_at` in the audit trail for an account.
    async fn get_last_calculation_time(
        &self,
        chain_id: u64,
        address: Address,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Upsert an audit row keyed by `(chain, address, calculated_at)`.
    async fn record_calculation(&self, record: &PointsCalculation) -> Result<()>;

    /// Apply one accrual run's awards for a chain atomically: add each award to
    /// the account total and record an audit row for every non-zero award.
    ///
    /// Returns the audit rows written.
    async fn apply_awards(
        &self,
        chain_id: u64,
        awards: &[AccountAward],
    ) -> Result<Vec<PointsCalculation>>;
}
