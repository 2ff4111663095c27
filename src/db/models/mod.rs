pub mod balance;
pub mod balance_change;
pub mod chain;
pub mod checkpoint;
pub mod points;

pub use balance::AccountBalance;
pub use balance_change::{BalanceChange, EventType};
pub use chain::ChainRecord;
pub use checkpoint::ChainCursor;
pub use points::{AccountAward, PointsCalculation};
