//! Test doubles and fixtures shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use alloy::primitives::{Address, Bytes, LogData, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use num_bigint::BigUint;

use crate::abis::{Transfer, IERC20};
use crate::config::ChainSettings;
use crate::db::models::{BalanceChange, EventType};
use crate::rpc::{ChainLog, ChainRpc};

pub const ALICE: Address = Address::repeat_byte(0xa1);
pub const BOB: Address = Address::repeat_byte(0xb0);
pub const CAROL: Address = Address::repeat_byte(0xc4);
pub const TOKEN: Address = Address::repeat_byte(0x70);

/// Seconds between mock blocks.
pub const BLOCK_TIME: u64 = 12;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// A change row with the given balance, keyed by block so distinct blocks
/// never collide.
pub fn change(address: Address, block: u64, balance_after: u64, created_at: i64) -> BalanceChange {
    BalanceChange {
        chain_id: 1,
        address,
        tx_hash: B256::from(U256::from(block)),
        log_index: 0,
        block_number: block,
        change_amount: BigUint::from(balance_after),
        balance_after: BigUint::from(balance_after),
        event_type: EventType::Transfer,
        created_at: ts(created_at),
    }
}

pub fn chain_settings(chain_id: u64) -> ChainSettings {
    ChainSettings {
        name: format!("testnet-{}", chain_id),
        chain_id,
        rpc_url: "http://localhost:8545".to_string(),
        contract_addr: TOKEN.to_string(),
        start_block: 0,
        confirmations: 6,
        poll_interval_milliseconds: 10,
        backfill_blocks: 100,
        max_block_range: 2_000,
    }
}

fn word(value: U256) -> Bytes {
    Bytes::from(value.to_be_bytes::<32>().to_vec())
}

#[derive(Default)]
struct MockState {
    head: u64,
    logs: Vec<ChainLog>,
    /// Balance history per account as `(block, balance)`, ascending.
    history: HashMap<Address, Vec<(u64, U256)>>,
    log_ranges: Vec<(u64, u64)>,
    balance_reads: Vec<(Address, Option<u64>)>,
}

/// Scripted chain: transfers pushed here become logs and move balances at
/// their block.
pub struct MockRpc {
    chain_id: u64,
    decimals: Option<u8>,
    state: Mutex<MockState>,
    fail_logs: AtomicBool,
    fail_head: AtomicBool,
    timestamp_calls: AtomicUsize,
}

impl MockRpc {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            decimals: Some(18),
            state: Mutex::new(MockState::default()),
            fail_logs: AtomicBool::new(false),
            fail_head: AtomicBool::new(false),
            timestamp_calls: AtomicUsize::new(0),
        }
    }

    pub fn without_decimals(mut self) -> Self {
        self.decimals = None;
        self
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn set_fail_logs(&self, fail: bool) {
        self.fail_logs.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_head(&self, fail: bool) {
        self.fail_head.store(fail, Ordering::SeqCst);
    }

    /// Emit a `Transfer` from the token contract and apply it to balances.
    pub fn push_transfer(&self, block: u64, log_index: u64, from: Address, to: Address, value: u64) {
        let value = U256::from(value);
        let mut state = self.state.lock().unwrap();

        for (party, credit) in [(from, false), (to, true)] {
            if party == Address::ZERO {
                continue;
            }
            let history = state.history.entry(party).or_default();
            let current = history.last().map(|(_, b)| *b).unwrap_or_default();
            let next = if credit {
                current + value
            } else {
                current.saturating_sub(value)
            };
            history.push((block, next));
        }

        state.logs.push(ChainLog {
            address: TOKEN,
            topics: vec![Transfer::SIGNATURE_HASH, from.into_word(), to.into_word()],
            data: word(value),
            block_number: Some(block),
            tx_hash: Some(B256::from(U256::from(block * 1_000 + log_index))),
            log_index: Some(log_index),
        });
    }

    pub fn push_log(&self, log: ChainLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    /// Inclusive ranges passed to `filter_logs`, in call order.
    pub fn log_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().log_ranges.clone()
    }

    /// `(owner, block)` of every `balanceOf` read, in call order.
    pub fn balance_reads(&self) -> Vec<(Address, Option<u64>)> {
        self.state.lock().unwrap().balance_reads.clone()
    }

    pub fn timestamp_calls(&self) -> usize {
        self.timestamp_calls.load(Ordering::SeqCst)
    }

    /// Balance after all transfers up to and including `block`.
    pub fn balance_at(&self, owner: Address, block: Option<u64>) -> U256 {
        let state = self.state.lock().unwrap();
        state
            .history
            .get(&owner)
            .and_then(|history| {
                history
                    .iter()
                    .rev()
                    .find(|(b, _)| block.map_or(true, |limit| *b <= limit))
                    .map(|(_, balance)| *balance)
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn head_block_number(&self) -> Result<u64> {
        if self.fail_head.load(Ordering::SeqCst) {
            bail!("mock head unavailable");
        }
        Ok(self.state.lock().unwrap().head)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64> {
        self.timestamp_calls.fetch_add(1, Ordering::SeqCst);
        Ok(block_number * BLOCK_TIME)
    }

    async fn filter_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract: Address,
        topic0: B256,
    ) -> Result<Vec<ChainLog>> {
        if self.fail_logs.load(Ordering::SeqCst) {
            bail!("mock logs unavailable");
        }

        let mut state = self.state.lock().unwrap();
        state.log_ranges.push((from_block, to_block));

        Ok(state
            .logs
            .iter()
            .filter(|log| {
                log.address == contract
                    && log.topics.first() == Some(&topic0)
                    && log
                        .block_number
                        .is_some_and(|b| b >= from_block && b <= to_block)
            })
            .cloned()
            .collect())
    }

    async fn call(&self, contract: Address, calldata: Bytes, block: Option<u64>) -> Result<Bytes> {
        if contract != TOKEN {
            bail!("no contract at {}", contract);
        }

        let selector: [u8; 4] = calldata
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| anyhow!("calldata too short"))?;

        if selector == IERC20::balanceOfCall::SELECTOR {
            let call = IERC20::balanceOfCall::abi_decode(&calldata)?;
            self.state
                .lock()
                .unwrap()
                .balance_reads
                .push((call.account, block));
            return Ok(word(self.balance_at(call.account, block)));
        }

        if selector == IERC20::decimalsCall::SELECTOR {
            if let Some(decimals) = self.decimals {
                return Ok(word(U256::from(decimals)));
            }
        }

        bail!("execution reverted")
    }
}

/// Raw log data for a `Transfer`, used to build malformed variants in tests.
pub fn transfer_log_data(from: Address, to: Address, value: u64) -> LogData {
    LogData::new_unchecked(
        vec![Transfer::SIGNATURE_HASH, from.into_word(), to.into_word()],
        word(U256::from(value)),
    )
}
