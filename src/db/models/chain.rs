use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// A monitored chain as registered in the `chains` table.
///
/// The row is written when a chain's indexer is built so the accrual
/// engine can discover the chain even before its first range commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainRecord {
    pub chain_id: u64,
    pub name: String,
    pub contract_addr: Address,
}

impl ChainRecord {
    pub fn new(chain_id: u64, name: impl Into<String>, contract_addr: Address) -> Self {
        Self {
            chain_id,
            name: name.into(),
            contract_addr,
        }
    }
}
