use alloy::primitives::Address;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Current ground-truth balance of an account, overwritten from live reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub chain_id: u64,
    pub address: Address,
    pub balance: BigUint,
}
