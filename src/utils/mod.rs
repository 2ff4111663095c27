//! Utility functions for the pointkeeper service.
//!
//! - [`conversion`] - Type conversions (U256, BigUint, decimal strings, hex encoding)

mod conversion;

// ============================================
// Re-exports
// ============================================

pub use conversion::{format_units, hex_encode, parse_biguint, u256_to_biguint};
