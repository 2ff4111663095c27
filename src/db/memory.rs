//! In-memory ledger backend.
//!
//! Keeps the whole ledger behind one mutex, which makes every trait operation
//! trivially atomic. Useful for tests and short-lived runs that don't need
//! persistence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy::primitives::{Address, B256};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;

use crate::db::models::{
    AccountAward, AccountBalance, BalanceChange, ChainCursor, ChainRecord, EventType,
    PointsCalculation,
};
use crate::db::LedgerStore;

type ChangeKey = (u64, B256, u64, Address, EventType);

#[derive(Default)]
struct ChainRow {
    record: Option<ChainRecord>,
    cursor: Option<ChainCursor>,
}

#[derive(Default)]
struct Ledger {
    chains: BTreeMap<u64, ChainRow>,
    balances: HashMap<(u64, Address), BigUint>,
    changes: Vec<BalanceChange>,
    change_keys: HashSet<ChangeKey>,
    points: HashMap<(u64, Address), BigUint>,
    calculations: Vec<PointsCalculation>,
    failing_chain: Option<u64>,
}

impl Ledger {
    fn advance_cursor(&mut self, chain_id: u64, block: u64) {
        let row = self.chains.entry(chain_id).or_default();
        let current = row.cursor.as_ref().map(|c| c.last_processed_block);
        if current.map_or(true, |current| block > current) {
            row.cursor = Some(ChainCursor::new(chain_id, block));
        }
    }

    fn push_change(&mut self, change: &BalanceChange) -> bool {
        if !self.change_keys.insert(change.dedup_key()) {
            return false;
        }
        self.changes.push(change.clone());
        true
    }

    fn upsert_calculation(&mut self, record: PointsCalculation) {
        match self.calculations.iter_mut().find(|c| {
            c.chain_id == record.chain_id
                && c.address == record.address
                && c.calculated_at == record.calculated_at
        }) {
            Some(existing) => *existing = record,
            None => self.calculations.push(record),
        }
    }
}

/// In-memory [`LedgerStore`]. All data is lost when the process exits.
///
/// Besides the trait, it exposes read-only inspection of the audit trail,
/// the change log and registered chains.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: Mutex<Ledger>,
    fail_writes: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until switched off again.
    #[cfg(test)]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make writes for one chain fail while other chains keep working.
    #[cfg(test)]
    pub fn set_failing_chain(&self, chain_id: Option<u64>) {
        self.ledger().failing_chain = chain_id;
    }

    /// Audit rows recorded for a chain, in insertion order.
    pub fn calculations(&self, chain_id: u64) -> Vec<PointsCalculation> {
        self.ledger()
            .calculations
            .iter()
            .filter(|c| c.chain_id == chain_id)
            .cloned()
            .collect()
    }

    /// Number of change rows recorded for a chain.
    pub fn change_count(&self, chain_id: u64) -> usize {
        self.ledger()
            .changes
            .iter()
            .filter(|c| c.chain_id == chain_id)
            .count()
    }

    /// Registered metadata of a chain.
    pub fn chain(&self, chain_id: u64) -> Option<ChainRecord> {
        self.ledger()
            .chains
            .get(&chain_id)
            .and_then(|row| row.record.clone())
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self, chain_id: u64) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("In-memory ledger is rejecting writes");
        }
        if self.ledger().failing_chain == Some(chain_id) {
            bail!("In-memory ledger is rejecting writes for chain {}", chain_id);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn register_chain(&self, chain: &ChainRecord) -> Result<()> {
        self.check_writable(chain.chain_id)?;
        self.ledger().chains.entry(chain.chain_id).or_default().record = Some(chain.clone());
        Ok(())
    }

    async fn get_chain_ids(&self) -> Result<Vec<u64>> {
        Ok(self.ledger().chains.keys().copied().collect())
    }

    async fn get_cursor(&self, chain_id: u64) -> Result<Option<ChainCursor>> {
        Ok(self
            .ledger()
            .chains
            .get(&chain_id)
            .and_then(|row| row.cursor.clone()))
    }

    async fn set_cursor(&self, cursor: &ChainCursor) -> Result<()> {
        self.check_writable(cursor.chain_id)?;
        self.ledger()
            .advance_cursor(cursor.chain_id, cursor.last_processed_block);
        Ok(())
    }

    async fn get_balance(&self, chain_id: u64, address: Address) -> Result<Option<BigUint>> {
        Ok(self.ledger().balances.get(&(chain_id, address)).cloned())
    }

    async fn set_balance(&self, balance: &AccountBalance) -> Result<()> {
        self.check_writable(balance.chain_id)?;
        self.ledger()
            .balances
            .insert((balance.chain_id, balance.address), balance.balance.clone());
        Ok(())
    }

    async fn append_balance_change(&self, change: &BalanceChange) -> Result<bool> {
        self.check_writable(change.chain_id)?;
        Ok(self.ledger().push_change(change))
    }

    async fn commit_range(
        &self,
        chain_id: u64,
        end_block: u64,
        changes: &[BalanceChange],
    ) -> Result<usize> {
        self.check_writable(chain_id)?;

        let mut ledger = self.ledger();
        let mut inserted = 0;
        for change in changes {
            if change.address != Address::ZERO {
                ledger
                    .balances
                    .insert((chain_id, change.address), change.balance_after.clone());
            }
            if ledger.push_change(change) {
                inserted += 1;
            }
        }
        ledger.advance_cursor(chain_id, end_block);

        Ok(inserted)
    }

    async fn get_balance_changes(&self, chain_id: u64) -> Result<Vec<BalanceChange>> {
        let mut changes: Vec<BalanceChange> = self
            .ledger()
            .changes
            .iter()
            .filter(|c| c.chain_id == chain_id)
            .cloned()
            .collect();

        changes.sort_by(|a, b| {
            (a.address, a.created_at, a.block_number, a.log_index).cmp(&(
                b.address,
                b.created_at,
                b.block_number,
                b.log_index,
            ))
        });

        Ok(changes)
    }

    async fn get_total_points(&self, chain_id: u64, address: Address) -> Result<BigUint> {
        Ok(self
            .ledger()
            .points
            .get(&(chain_id, address))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_total_points(
        &self,
        chain_id: u64,
        address: Address,
        total_points: &BigUint,
    ) -> Result<()> {
        self.check_writable(chain_id)?;
        self.ledger()
            .points
            .insert((chain_id, address), total_points.clone());
        Ok(())
    }

    async fn get_last_calculation_time(
        &self,
        chain_id: u64,
        address: Address,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .ledger()
            .calculations
            .iter()
            .filter(|c| c.chain_id == chain_id && c.address == address)
            .map(|c| c.calculated_at)
            .max())
    }

    async fn record_calculation(&self, record: &PointsCalculation) -> Result<()> {
        self.check_writable(record.chain_id)?;
        self.ledger().upsert_calculation(record.clone());
        Ok(())
    }

    async fn apply_awards(
        &self,
        chain_id: u64,
        awards: &[AccountAward],
    ) -> Result<Vec<PointsCalculation>> {
        self.check_writable(chain_id)?;

        let mut ledger = self.ledger();
        let mut written = Vec::new();
        for award in awards {
            let total = ledger.points.entry((chain_id, award.address)).or_default();
            *total += &award.points_added;
            let total_after = total.clone();

            if award.points_added.is_zero() {
                continue;
            }

            let record = PointsCalculation {
                chain_id,
                address: award.address,
                calculated_at: award.calculated_at,
                balance: award.balance_snapshot.clone(),
                points_added: award.points_added.clone(),
                total_points_after: total_after,
            };
            ledger.upsert_calculation(record.clone());
            written.push(record);
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{change, ts, ALICE, BOB};

    async fn cursor_block(ledger: &InMemoryLedger, chain_id: u64) -> Option<u64> {
        ledger
            .get_cursor(chain_id)
            .await
            .unwrap()
            .map(|c| c.last_processed_block)
    }

    #[tokio::test]
    async fn test_cursor_never_regresses() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.get_cursor(1).await.unwrap().is_none());

        ledger.set_cursor(&ChainCursor::new(1, 100)).await.unwrap();
        ledger.set_cursor(&ChainCursor::new(1, 90)).await.unwrap();
        assert_eq!(cursor_block(&ledger, 1).await, Some(100));

        ledger.commit_range(1, 80, &[]).await.unwrap();
        assert_eq!(cursor_block(&ledger, 1).await, Some(100));
    }

    #[tokio::test]
    async fn test_commit_range_is_idempotent_on_replay() {
        let ledger = InMemoryLedger::new();
        let rows = vec![change(ALICE, 10, 100, 1_000), change(BOB, 10, 100, 2_000)];

        assert_eq!(ledger.commit_range(1, 10, &rows).await.unwrap(), 2);
        assert_eq!(ledger.commit_range(1, 10, &rows).await.unwrap(), 0);
        assert_eq!(ledger.change_count(1), 2);
        assert_eq!(
            ledger.get_balance(1, BOB).await.unwrap(),
            Some(BigUint::from(100u32))
        );
    }

    #[tokio::test]
    async fn test_commit_range_skips_zero_address_balance() {
        let ledger = InMemoryLedger::new();
        let rows = vec![change(Address::ZERO, 5, 0, 1_000), change(ALICE, 5, 7, 1_000)];

        ledger.commit_range(1, 5, &rows).await.unwrap();
        assert_eq!(ledger.get_balance(1, Address::ZERO).await.unwrap(), None);
        assert_eq!(ledger.change_count(1), 2);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_ledger_untouched() {
        let ledger = InMemoryLedger::new();
        ledger.set_fail_writes(true);

        let rows = vec![change(ALICE, 10, 100, 1_000)];
        assert!(ledger.commit_range(1, 10, &rows).await.is_err());
        assert_eq!(cursor_block(&ledger, 1).await, None);
        assert_eq!(ledger.change_count(1), 0);
        assert_eq!(ledger.get_balance(1, ALICE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_changes_are_ordered_by_address_then_time() {
        let ledger = InMemoryLedger::new();
        let rows = vec![
            change(BOB, 3, 1, 3_000),
            change(ALICE, 2, 1, 2_000),
            change(BOB, 1, 1, 1_000),
            change(ALICE, 4, 1, 500),
        ];
        ledger.commit_range(1, 4, &rows).await.unwrap();

        let ordered = ledger.get_balance_changes(1).await.unwrap();
        let keys: Vec<(Address, i64)> = ordered
            .iter()
            .map(|c| (c.address, c.created_at.timestamp()))
            .collect();
        assert_eq!(
            keys,
            vec![(ALICE, 500), (ALICE, 2_000), (BOB, 1_000), (BOB, 3_000)]
        );
    }

    #[tokio::test]
    async fn test_apply_awards_accumulates_and_skips_zero_records() {
        let ledger = InMemoryLedger::new();
        let awards = vec![
            AccountAward {
                address: ALICE,
                balance_snapshot: BigUint::from(10u32),
                points_added: BigUint::from(5u32),
                calculated_at: ts(100),
            },
            AccountAward {
                address: BOB,
                balance_snapshot: BigUint::from(0u32),
                points_added: BigUint::zero(),
                calculated_at: ts(100),
            },
        ];

        let written = ledger.apply_awards(1, &awards).await.unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].total_points_after, BigUint::from(5u32));

        ledger.apply_awards(1, &awards[..1]).await.unwrap();
        assert_eq!(
            ledger.get_total_points(1, ALICE).await.unwrap(),
            BigUint::from(10u32)
        );
        assert_eq!(
            ledger.get_last_calculation_time(1, ALICE).await.unwrap(),
            Some(ts(100))
        );
        assert_eq!(ledger.get_last_calculation_time(1, BOB).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_single_row_writes() {
        let ledger = InMemoryLedger::new();

        ledger
            .set_balance(&AccountBalance {
                chain_id: 1,
                address: ALICE,
                balance: BigUint::from(3u32),
            })
            .await
            .unwrap();
        assert_eq!(
            ledger.get_balance(1, ALICE).await.unwrap(),
            Some(BigUint::from(3u32))
        );

        let row = change(ALICE, 7, 3, 700);
        assert!(ledger.append_balance_change(&row).await.unwrap());
        assert!(!ledger.append_balance_change(&row).await.unwrap());

        ledger
            .set_total_points(1, ALICE, &BigUint::from(42u32))
            .await
            .unwrap();
        let record = PointsCalculation {
            chain_id: 1,
            address: ALICE,
            calculated_at: ts(900),
            balance: BigUint::from(3u32),
            points_added: BigUint::from(42u32),
            total_points_after: BigUint::from(42u32),
        };
        ledger.record_calculation(&record).await.unwrap();
        ledger.record_calculation(&record).await.unwrap();

        assert_eq!(ledger.calculations(1).len(), 1);
        assert_eq!(
            ledger.get_total_points(1, ALICE).await.unwrap(),
            BigUint::from(42u32)
        );
        assert_eq!(
            ledger.get_last_calculation_time(1, ALICE).await.unwrap(),
            Some(ts(900))
        );
    }
}
