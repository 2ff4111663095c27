pub mod erc20;
pub mod transfer;

pub use erc20::IERC20;
pub use transfer::Transfer;
