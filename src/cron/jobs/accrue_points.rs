//! Job crediting time-weighted points to every holder on every chain.
//!
//! Reads each chain's balance change log, computes what every account earned
//! since its last calculation and applies the awards in one atomic write per
//! chain. A failing chain is logged and skipped; the others still accrue.

use std::time::Instant;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use num_bigint::BigUint;
use rustc_hash::FxHashMap;

use crate::db::LedgerStore;
use crate::points::{compute_awards, PointsRate};

/// Outcome of one chain's accrual.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChainAccrual {
    /// Accounts whose totals were touched.
    pub accounts: usize,
    /// Audit rows written (accounts with a non-zero award).
    pub records: usize,
    pub points_added: BigUint,
}

/// Outcome of one accrual run across all chains.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AccrualSummary {
    pub chains: usize,
    pub failed_chains: usize,
    pub accounts: usize,
    pub records: usize,
    pub points_added: BigUint,
}

pub async fn run(
    store: &dyn LedgerStore,
    rate: &PointsRate,
    now: DateTime<Utc>,
) -> Result<AccrualSummary> {
    info!("Starting accrue_points job...");

    let start = Instant::now();
    let chain_ids = store
        .get_chain_ids()
        .await
        .context("Failed to list chains for accrual")?;

    let mut summary = AccrualSummary::default();

    for chain_id in chain_ids {
        summary.chains += 1;

        match accrue_chain(store, chain_id, rate, now).await {
            Ok(chain) => {
                summary.accounts += chain.accounts;
                summary.records += chain.records;
                summary.points_added += chain.points_added;
            },
            Err(e) => {
                summary.failed_chains += 1;
                error!("Failed to accrue points for chain {}: {:#}", chain_id, e);
            },
        }
    }

    info!(
        "Completed accrue_points job in {:?} ({} chains, {} failed, {} accounts, {} awards, {} points)",
        start.elapsed(),
        summary.chains,
        summary.failed_chains,
        summary.accounts,
        summary.records,
        summary.points_added
    );

    Ok(summary)
}

pub async fn accrue_chain(
    store: &dyn LedgerStore,
    chain_id: u64,
    rate: &PointsRate,
    now: DateTime<Utc>,
) -> Result<ChainAccrual> {
    let changes = store
        .get_balance_changes(chain_id)
        .await
        .context("Failed to load balance changes")?;

    if changes.is_empty() {
        return Ok(ChainAccrual::default());
    }

    let mut addresses: Vec<Address> = changes
        .iter()
        .map(|c| c.address)
        .filter(|a| *a != Address::ZERO)
        .collect();
    addresses.sort_unstable();
    addresses.dedup();

    let mut last_calculated = FxHashMap::default();
    for address in addresses {
        if let Some(at) = store
            .get_last_calculation_time(chain_id, address)
            .await
            .with_context(|| format!("Failed to load last calculation time of {}", address))?
        {
            last_calculated.insert(address, at);
        }
    }

    let awards = compute_awards(changes, &last_calculated, now, rate);
    let records = store
        .apply_awards(chain_id, &awards)
        .await
        .context("Failed to apply awards")?;

    let points_added: BigUint = records.iter().map(|r| &r.points_added).sum();

    info!(
        "Chain {}: accrued {} points for {} of {} accounts",
        chain_id,
        points_added,
        records.len(),
        awards.len()
    );

    Ok(ChainAccrual {
        accounts: awards.len(),
        records: records.len(),
        points_added,
    })
}
