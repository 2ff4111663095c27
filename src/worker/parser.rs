//! Decoding of `Transfer` logs into typed records.

use alloy::primitives::{Address, LogData, B256, U256};
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use log::warn;

use crate::abis::Transfer;
use crate::db::models::EventType;
use crate::rpc::ChainLog;

/// A decoded token transfer with its position on chain.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferLog {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub event_type: EventType,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// Outcome of decoding one batch of logs.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Decoded transfers in chain order (block number, then log index).
    pub transfers: Vec<TransferLog>,
    /// Logs that could not be decoded and were dropped.
    pub skipped: usize,
}

/// Decode a single log. Logs without a position (pending) are rejected.
pub fn decode_transfer(log: &ChainLog) -> Result<TransferLog> {
    let Some(topic0) = log.topics.first() else {
        anyhow::bail!("Log has no topics");
    };
    if *topic0 != Transfer::SIGNATURE_HASH {
        anyhow::bail!("Unexpected event signature {}", topic0);
    }

    let block_number = log.block_number.context("Log has no block number")?;
    let tx_hash = log.tx_hash.context("Log has no transaction hash")?;
    let log_index = log.log_index.context("Log has no log index")?;

    let log_data = LogData::new_unchecked(log.topics.clone(), log.data.clone());
    let event = Transfer::decode_log_data(&log_data)
        .with_context(|| format!("Malformed Transfer log in tx {}", tx_hash))?;

    Ok(TransferLog {
        from: event.from,
        to: event.to,
        value: event.value,
        event_type: EventType::classify(event.from, event.to),
        block_number,
        tx_hash,
        log_index,
    })
}

/// Decode a batch, skipping (and logging) logs that fail to decode.
pub fn parse_logs(logs: impl IntoIterator<Item = ChainLog>) -> ParseResult {
    let mut result = ParseResult::default();

    for log in logs {
        match decode_transfer(&log) {
            Ok(transfer) => result.transfers.push(transfer),
            Err(e) => {
                warn!(
                    "Skipping undecodable log at block {:?} index {:?}: {:#}",
                    log.block_number, log.log_index, e
                );
                result.skipped += 1;
            },
        }
    }

    result
        .transfers
        .sort_by_key(|t| (t.block_number, t.log_index));

    result
}
