use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Classification of a token transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Mint,
    Burn,
    Transfer,
}

impl EventType {
    /// Classify a transfer by its endpoints: minted from the zero address,
    /// burned to it, plain transfer otherwise.
    pub fn classify(from: Address, to: Address) -> Self {
        if from == Address::ZERO {
            EventType::Mint
        } else if to == Address::ZERO {
            EventType::Burn
        } else {
            EventType::Transfer
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Mint => "mint",
            EventType::Burn => "burn",
            EventType::Transfer => "transfer",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mint" => Ok(EventType::Mint),
            "burn" => Ok(EventType::Burn),
            "transfer" => Ok(EventType::Transfer),
            other => Err(anyhow::anyhow!("Unknown balance event type: {}", other)),
        }
    }
}

/// One row of the append-only balance change log.
///
/// Every transfer produces two rows, one per party, both carrying the
/// transfer's classification. `created_at` is the block timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub chain_id: u64,
    pub address: Address,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub change_amount: BigUint,
    pub balance_after: BigUint,
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
}

impl BalanceChange {
    /// Key the change log is unique on. Replaying a range yields the same keys.
    pub fn dedup_key(&self) -> (u64, B256, u64, Address, EventType) {
        (
            self.chain_id,
            self.tx_hash,
            self.log_index,
            self.address,
            self.event_type,
        )
    }
}
