#[allow(clippy::module_inception)]
mod config;

pub use config::{ChainSettings, PointsSettings, PostgresSettings, Settings};
