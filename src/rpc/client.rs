use std::time::Duration;

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, TransactionRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use url::Url;

use crate::rpc::{ChainLog, ChainRpc};

/// Timeout for individual RPC calls (30 seconds)
const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// [`ChainRpc`] over JSON-RPC/HTTP.
#[derive(Clone)]
pub struct RpcClient {
    provider: DynProvider,
}

impl RpcClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url = Url::parse(rpc_url).with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let client = ProviderBuilder::new().connect_http(url);

        Ok(Self {
            provider: DynProvider::new(client),
        })
    }
}

#[async_trait]
impl ChainRpc for RpcClient {
    async fn chain_id(&self) -> Result<u64> {
        tokio::time::timeout(RPC_CALL_TIMEOUT, self.provider.get_chain_id())
            .await
            .context("eth_chainId timed out")?
            .context("eth_chainId failed")
    }

    async fn head_block_number(&self) -> Result<u64> {
        tokio::time::timeout(RPC_CALL_TIMEOUT, self.provider.get_block_number())
            .await
            .context("eth_blockNumber timed out")?
            .context("eth_blockNumber failed")
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64> {
        let block = tokio::time::timeout(
            RPC_CALL_TIMEOUT,
            self.provider
                .get_block_by_number(BlockNumberOrTag::Number(block_number)),
        )
        .await
        .with_context(|| format!("Fetching block {} timed out", block_number))?
        .with_context(|| format!("Failed to fetch block {}", block_number))?
        .with_context(|| format!("Block {} not found", block_number))?;

        Ok(block.header.timestamp)
    }

    async fn filter_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract: Address,
        topic0: B256,
    ) -> Result<Vec<ChainLog>> {
        let filter = Filter::new()
            .address(contract)
            .event_signature(topic0)
            .from_block(from_block)
            .to_block(to_block);

        let logs = tokio::time::timeout(RPC_CALL_TIMEOUT, self.provider.get_logs(&filter))
            .await
            .with_context(|| format!("eth_getLogs [{}, {}] timed out", from_block, to_block))?
            .with_context(|| format!("eth_getLogs [{}, {}] failed", from_block, to_block))?;

        Ok(logs.into_iter().map(ChainLog::from).collect())
    }

    async fn call(&self, contract: Address, calldata: Bytes, block: Option<u64>) -> Result<Bytes> {
        let tx = TransactionRequest::default()
            .with_to(contract)
            .with_input(calldata);

        let block_id = block.map_or(BlockId::latest(), BlockId::number);

        tokio::time::timeout(RPC_CALL_TIMEOUT, self.provider.call(tx).block(block_id))
            .await
            .with_context(|| format!("eth_call to {} timed out", contract))?
            .with_context(|| format!("eth_call to {} failed", contract))
    }
}
