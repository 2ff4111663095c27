pub mod abis;
pub mod config;
pub mod cron;
pub mod db;
pub mod points;
pub mod rpc;
pub mod utils;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::Settings;
pub use cron::{AccrualRunner, PointsScheduler};
pub use db::{InMemoryLedger, LedgerStore, PostgresClient};
pub use points::PointsRate;
pub use rpc::{ChainRpc, RpcClient};
pub use worker::{ChainManager, ChainWorker};
