use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use log::warn;

use crate::abis::IERC20;
use crate::rpc::ChainRpc;

/// Decimals assumed when the token does not answer `decimals()`.
pub const DEFAULT_DECIMALS: u8 = 18;

/// Symbol used when the token does not answer `symbol()`.
pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";

/// Display metadata of the tracked token. Only used for log formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub decimals: u8,
    pub symbol: String,
}

/// ERC-20 view calls against one token contract.
#[derive(Clone)]
pub struct TokenReader {
    rpc: Arc<dyn ChainRpc>,
    contract: Address,
}

impl TokenReader {
    pub fn new(rpc: Arc<dyn ChainRpc>, contract: Address) -> Self {
        Self { rpc, contract }
    }

    /// Balance of `owner` as of the end of `block`.
    pub async fn balance_of(&self, owner: Address, block: u64) -> Result<U256> {
        let calldata = IERC20::balanceOfCall { account: owner }.abi_encode();

        let returned = self
            .rpc
            .call(self.contract, calldata.into(), Some(block))
            .await
            .with_context(|| format!("balanceOf({}) at block {} failed", owner, block))?;

        IERC20::balanceOfCall::abi_decode_returns(&returned)
            .with_context(|| format!("Malformed balanceOf({}) return data", owner))
    }

    /// Read `decimals()` and `symbol()`, falling back to defaults for tokens
    /// that don't implement them.
    pub async fn metadata(&self) -> TokenMetadata {
        let decimals = match self.read::<IERC20::decimalsCall>(IERC20::decimalsCall {}).await {
            Ok(decimals) => decimals,
            Err(e) => {
                warn!(
                    "Token {} has no readable decimals, assuming {}: {:#}",
                    self.contract, DEFAULT_DECIMALS, e
                );
                DEFAULT_DECIMALS
            },
        };

        let symbol = self
            .read::<IERC20::symbolCall>(IERC20::symbolCall {})
            .await
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN_SYMBOL.to_string());

        TokenMetadata { decimals, symbol }
    }

    async fn read<C: SolCall>(&self, call: C) -> Result<C::Return> {
        let returned = self
            .rpc
            .call(self.contract, call.abi_encode().into(), None)
            .await?;

        Ok(C::abi_decode_returns(&returned)?)
    }
}
