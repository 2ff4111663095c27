use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Points earned by one account in one accrual run, before it is applied to
/// the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountAward {
    pub address: Address,
    /// Balance after the account's latest change, recorded in the audit trail.
    pub balance_snapshot: BigUint,
    pub points_added: BigUint,
    /// End of the last interval accrued in this run.
    pub calculated_at: DateTime<Utc>,
}

/// Audit trail row for one applied award.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsCalculation {
    pub chain_id: u64,
    pub address: Address,
    pub calculated_at: DateTime<Utc>,
    pub balance: BigUint,
    pub points_added: BigUint,
    pub total_points_after: BigUint,
}
