use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Indexer progress cursor.
///
/// Tracks the last block whose transfers are fully recorded for each chain.
/// Used to resume indexing after restarts without missing blocks; it only
/// ever moves forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainCursor {
    pub chain_id: u64,
    pub last_processed_block: u64,
    pub updated_at: DateTime<Utc>,
}

impl ChainCursor {
    pub fn new(chain_id: u64, last_processed_block: u64) -> Self {
        Self {
            chain_id,
            last_processed_block,
            updated_at: Utc::now(),
        }
    }
}
