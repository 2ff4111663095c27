pub mod chains;
pub mod parser;
pub mod token_reader;
#[allow(clippy::module_inception)]
pub mod worker;

pub use chains::ChainManager;
pub use token_reader::{TokenMetadata, TokenReader};
pub use worker::{safe_block, ChainWorker, PollOutcome};
