use std::str::FromStr;

use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Transaction;
use log::error;
use num_bigint::BigUint;
use num_traits::Zero;
use tokio_postgres::Row;

use crate::db::models::{
    AccountAward, AccountBalance, BalanceChange, ChainCursor, ChainRecord, EventType,
    PointsCalculation,
};
use crate::db::postgres::PostgresClient;
use crate::db::LedgerStore;
use crate::utils::{hex_encode, parse_biguint};

const UPSERT_BALANCE: &str = r#"
    INSERT INTO ledger.user_balances (chain_id, user_addr, balance, updated_at)
    VALUES ($1, $2, $3::text::numeric, NOW())
    ON CONFLICT (chain_id, user_addr) DO UPDATE SET
        balance = EXCLUDED.balance,
        updated_at = NOW()
"#;

const INSERT_BALANCE_CHANGE: &str = r#"
    INSERT INTO ledger.balance_changes (
        chain_id, user_addr, tx_hash, log_index, block_number,
        change_amount, balance_after, event_type, created_at
    ) VALUES ($1, $2, $3, $4, $5, $6::text::numeric, $7::text::numeric, $8, $9)
    ON CONFLICT (chain_id, tx_hash, log_index, user_addr, event_type) DO NOTHING
"#;

// Chains registered before their first commit start with a NULL cursor.
const ADVANCE_CURSOR: &str = r#"
    INSERT INTO ledger.chains (chain_id, name, contract_addr, last_processed_block, updated_at)
    VALUES ($1, '', '', $2, $3)
    ON CONFLICT (chain_id) DO UPDATE SET
        last_processed_block = GREATEST(
            COALESCE(ledger.chains.last_processed_block, EXCLUDED.last_processed_block),
            EXCLUDED.last_processed_block
        ),
        updated_at = EXCLUDED.updated_at
"#;

const ADD_POINTS: &str = r#"
    INSERT INTO ledger.user_points (chain_id, user_addr, total_points, updated_at)
    VALUES ($1, $2, $3::text::numeric, NOW())
    ON CONFLICT (chain_id, user_addr) DO UPDATE SET
        total_points = ledger.user_points.total_points + EXCLUDED.total_points,
        updated_at = NOW()
    RETURNING total_points::text AS total_points
"#;

const UPSERT_CALCULATION: &str = r#"
    INSERT INTO ledger.points_calculations (
        chain_id, user_addr, calculated_at, balance, points_added, total_points_after
    ) VALUES ($1, $2, $3, $4::text::numeric, $5::text::numeric, $6::text::numeric)
    ON CONFLICT (chain_id, user_addr, calculated_at) DO UPDATE SET
        balance = EXCLUDED.balance,
        points_added = EXCLUDED.points_added,
        total_points_after = EXCLUDED.total_points_after
"#;

/// Chain ids and block numbers are u64 in the service and BIGINT in storage.
fn to_db_int(value: u64) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("Value {} does not fit in BIGINT", value))
}

fn from_db_int(value: i64) -> Result<u64> {
    u64::try_from(value).with_context(|| format!("Negative BIGINT {} read from ledger", value))
}

fn parse_address(value: &str) -> Result<Address> {
    Address::from_str(value).with_context(|| format!("Invalid address in ledger: {}", value))
}

fn parse_tx_hash(value: &str) -> Result<B256> {
    B256::from_str(value).with_context(|| format!("Invalid tx hash in ledger: {}", value))
}

fn row_to_balance_change(row: &Row) -> Result<BalanceChange> {
    let event_type: String = row.get("event_type");
    Ok(BalanceChange {
        chain_id: from_db_int(row.get("chain_id"))?,
        address: parse_address(row.get("user_addr"))?,
        tx_hash: parse_tx_hash(row.get("tx_hash"))?,
        log_index: from_db_int(row.get("log_index"))?,
        block_number: from_db_int(row.get("block_number"))?,
        change_amount: parse_biguint(row.get("change_amount"))?,
        balance_after: parse_biguint(row.get("balance_after"))?,
        event_type: EventType::from_str(&event_type)?,
        created_at: row.get("created_at"),
    })
}

impl PostgresClient {
    async fn execute_calculation(tx: &Transaction<'_>, record: &PointsCalculation) -> Result<()> {
        tx.execute(
            UPSERT_CALCULATION,
            &[
                &to_db_int(record.chain_id)?,
                &hex_encode(record.address.as_slice()),
                &record.calculated_at,
                &record.balance.to_string(),
                &record.points_added.to_string(),
                &record.total_points_after.to_string(),
            ],
        )
        .await
        .with_context(|| {
            format!(
                "Failed to record points calculation for {} on chain {}",
                record.address, record.chain_id
            )
        })?;
        Ok(())
    }

    async fn execute_balance_change(tx: &Transaction<'_>, change: &BalanceChange) -> Result<bool> {
        let inserted = tx
            .execute(
                INSERT_BALANCE_CHANGE,
                &[
                    &to_db_int(change.chain_id)?,
                    &hex_encode(change.address.as_slice()),
                    &hex_encode(change.tx_hash.as_slice()),
                    &to_db_int(change.log_index)?,
                    &to_db_int(change.block_number)?,
                    &change.change_amount.to_string(),
                    &change.balance_after.to_string(),
                    &change.event_type.as_str(),
                    &change.created_at,
                ],
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to insert balance change {}:{} for {}",
                    change.tx_hash, change.log_index, change.address
                )
            })?;
        Ok(inserted > 0)
    }
}

#[async_trait]
impl LedgerStore for PostgresClient {
    // ==================== CHAINS ====================

    async fn register_chain(&self, chain: &ChainRecord) -> Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO ledger.chains (chain_id, name, contract_addr, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (chain_id) DO UPDATE SET
                name = EXCLUDED.name,
                contract_addr = EXCLUDED.contract_addr,
                updated_at = NOW()
        "#;

        client
            .execute(
                query,
                &[
                    &to_db_int(chain.chain_id)?,
                    &chain.name,
                    &hex_encode(chain.contract_addr.as_slice()),
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to register chain {}: {:?}", chain.chain_id, e);
                e
            })?;

        Ok(())
    }

    async fn get_chain_ids(&self) -> Result<Vec<u64>> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT chain_id FROM ledger.chains ORDER BY chain_id", &[])
            .await?;

        rows.iter().map(|row| from_db_int(row.get("chain_id"))).collect()
    }

    async fn get_cursor(&self, chain_id: u64) -> Result<Option<ChainCursor>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT chain_id, last_processed_block, updated_at
            FROM ledger.chains
            WHERE chain_id = $1 AND last_processed_block IS NOT NULL
        "#;

        let row = client.query_opt(query, &[&to_db_int(chain_id)?]).await?;

        row.map(|r| {
            Ok(ChainCursor {
                chain_id: from_db_int(r.get("chain_id"))?,
                last_processed_block: from_db_int(r.get("last_processed_block"))?,
                updated_at: r.get("updated_at"),
            })
        })
        .transpose()
    }

    async fn set_cursor(&self, cursor: &ChainCursor) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .execute(
                ADVANCE_CURSOR,
                &[
                    &to_db_int(cursor.chain_id)?,
                    &to_db_int(cursor.last_processed_block)?,
                    &cursor.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to set cursor for chain {}: {:?}", cursor.chain_id, e);
                e
            })?;

        Ok(())
    }

    // ==================== BALANCES ====================

    async fn get_balance(&self, chain_id: u64, address: Address) -> Result<Option<BigUint>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT balance::text AS balance
            FROM ledger.user_balances
            WHERE chain_id = $1 AND user_addr = $2
        "#;

        let row = client
            .query_opt(query, &[&to_db_int(chain_id)?, &hex_encode(address.as_slice())])
            .await?;

        row.map(|r| parse_biguint(r.get("balance"))).transpose()
    }

    async fn set_balance(&self, balance: &AccountBalance) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .execute(
                UPSERT_BALANCE,
                &[
                    &to_db_int(balance.chain_id)?,
                    &hex_encode(balance.address.as_slice()),
                    &balance.balance.to_string(),
                ],
            )
            .await
            .with_context(|| format!("Failed to set balance for {}", balance.address))?;

        Ok(())
    }

    async fn append_balance_change(&self, change: &BalanceChange) -> Result<bool> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let inserted = Self::execute_balance_change(&tx, change).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn commit_range(
        &self,
        chain_id: u64,
        end_block: u64,
        changes: &[BalanceChange],
    ) -> Result<usize> {
        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .context("Failed to open transaction for range commit")?;

        let db_chain_id = to_db_int(chain_id)?;
        let mut inserted = 0;

        for change in changes {
            if change.address != Address::ZERO {
                tx.execute(
                    UPSERT_BALANCE,
                    &[
                        &db_chain_id,
                        &hex_encode(change.address.as_slice()),
                        &change.balance_after.to_string(),
                    ],
                )
                .await
                .with_context(|| format!("Failed to set balance for {}", change.address))?;
            }

            if Self::execute_balance_change(&tx, change).await? {
                inserted += 1;
            }
        }

        tx.execute(
            ADVANCE_CURSOR,
            &[&db_chain_id, &to_db_int(end_block)?, &Utc::now()],
        )
        .await
        .with_context(|| format!("Failed to advance cursor for chain {}", chain_id))?;

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit range ending at block {}", end_block))?;

        Ok(inserted)
    }

    async fn get_balance_changes(&self, chain_id: u64) -> Result<Vec<BalanceChange>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT
                chain_id, user_addr, tx_hash, log_index, block_number,
                change_amount::text AS change_amount,
                balance_after::text AS balance_after,
                event_type, created_at
            FROM ledger.balance_changes
            WHERE chain_id = $1
            ORDER BY user_addr COLLATE "C", created_at, block_number, log_index
        "#;

        let rows = client.query(query, &[&to_db_int(chain_id)?]).await?;

        rows.iter().map(row_to_balance_change).collect()
    }

    // ==================== POINTS ====================

    async fn get_total_points(&self, chain_id: u64, address: Address) -> Result<BigUint> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT total_points::text AS total_points
            FROM ledger.user_points
            WHERE chain_id = $1 AND user_addr = $2
        "#;

        let row = client
            .query_opt(query, &[&to_db_int(chain_id)?, &hex_encode(address.as_slice())])
            .await?;

        match row {
            Some(r) => parse_biguint(r.get("total_points")),
            None => Ok(BigUint::zero()),
        }
    }

    async fn set_total_points(
        &self,
        chain_id: u64,
        address: Address,
        total_points: &BigUint,
    ) -> Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO ledger.user_points (chain_id, user_addr, total_points, updated_at)
            VALUES ($1, $2, $3::text::numeric, NOW())
            ON CONFLICT (chain_id, user_addr) DO UPDATE SET
                total_points = EXCLUDED.total_points,
                updated_at = NOW()
        "#;

        client
            .execute(
                query,
                &[
                    &to_db_int(chain_id)?,
                    &hex_encode(address.as_slice()),
                    &total_points.to_string(),
                ],
            )
            .await
            .with_context(|| format!("Failed to set total points for {}", address))?;

        Ok(())
    }

    async fn get_last_calculation_time(
        &self,
        chain_id: u64,
        address: Address,
    ) -> Result<Option<DateTime<Utc>>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT MAX(calculated_at) AS last_calculated_at
            FROM ledger.points_calculations
            WHERE chain_id = $1 AND user_addr = $2
        "#;

        let row = client
            .query_one(query, &[&to_db_int(chain_id)?, &hex_encode(address.as_slice())])
            .await?;

        Ok(row.get("last_calculated_at"))
    }

    async fn record_calculation(&self, record: &PointsCalculation) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        Self::execute_calculation(&tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply_awards(
        &self,
        chain_id: u64,
        awards: &[AccountAward],
    ) -> Result<Vec<PointsCalculation>> {
        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .context("Failed to open transaction for points update")?;

        let db_chain_id = to_db_int(chain_id)?;
        let mut written = Vec::new();

        for award in awards {
            let row = tx
                .query_one(
                    ADD_POINTS,
                    &[
                        &db_chain_id,
                        &hex_encode(award.address.as_slice()),
                        &award.points_added.to_string(),
                    ],
                )
                .await
                .with_context(|| format!("Failed to add points for {}", award.address))?;

            if award.points_added.is_zero() {
                continue;
            }

            let record = PointsCalculation {
                chain_id,
                address: award.address,
                calculated_at: award.calculated_at,
                balance: award.balance_snapshot.clone(),
                points_added: award.points_added.clone(),
                total_points_after: parse_biguint(row.get("total_points"))?,
            };
            Self::execute_calculation(&tx, &record).await?;
            written.push(record);
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit points update for chain {}", chain_id))?;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_int_bounds() {
        assert_eq!(to_db_int(42).unwrap(), 42);
        assert!(to_db_int(u64::MAX).is_err());
        assert_eq!(from_db_int(7).unwrap(), 7);
        assert!(from_db_int(-1).is_err());
    }

    #[test]
    fn test_stored_addresses_parse_back() {
        let address = Address::repeat_byte(0xab);
        let stored = hex_encode(address.as_slice());
        assert_eq!(stored, format!("0x{}", "ab".repeat(20)));
        assert_eq!(parse_address(&stored).unwrap(), address);

        let hash = B256::repeat_byte(0x01);
        assert_eq!(parse_tx_hash(&hex_encode(hash.as_slice())).unwrap(), hash);
    }
}
