//! Chain access behind a trait, so the indexer can run against a live node or
//! a scripted test double.

mod client;

use alloy::primitives::{Address, Bytes, B256};
use anyhow::Result;
use async_trait::async_trait;

pub use client::RpcClient;

/// A log as the indexer sees it. Positional fields are optional because nodes
/// omit them for pending logs.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub tx_hash: Option<B256>,
    pub log_index: Option<u64>,
}

impl From<alloy::rpc::types::Log> for ChainLog {
    fn from(log: alloy::rpc::types::Log) -> Self {
        Self {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_number: log.block_number,
            tx_hash: log.transaction_hash,
            log_index: log.log_index,
        }
    }
}

/// Read-only view of one chain.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Chain id reported by the node.
    async fn chain_id(&self) -> Result<u64>;

    /// Number of the latest block.
    async fn head_block_number(&self) -> Result<u64>;

    /// Unix timestamp (seconds) of a block.
    async fn block_timestamp(&self, block_number: u64) -> Result<u64>;

    /// Logs emitted by `contract` with first topic `topic0` in the inclusive
    /// range `[from_block, to_block]`.
    async fn filter_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract: Address,
        topic0: B256,
    ) -> Result<Vec<ChainLog>>;

    /// `eth_call` against `contract`, at `block` or at the latest block when
    /// `None`.
    async fn call(&self, contract: Address, calldata: Bytes, block: Option<u64>) -> Result<Bytes>;
}
