use std::collections::HashSet;
use std::str::FromStr;

use alloy::primitives::Address;
use anyhow::{bail, Context};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// PostgreSQL ledger connection configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_pool_size() -> usize {
    16
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// One monitored chain and its token contract.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub contract_addr: String,
    /// First block to index when no cursor is stored. Zero means "recent
    /// history only", see `backfill_blocks`.
    ///
    /// Balances are read at each transfer's block, so starting far behind
    /// head needs an archive node.
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_milliseconds: u64,
    /// How far behind head to start when neither a cursor nor a start block
    /// is available.
    #[serde(default = "default_backfill_blocks")]
    pub backfill_blocks: u64,
    /// Largest block span fetched and committed as one unit.
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
}

fn default_confirmations() -> u64 {
    6
}

fn default_poll_interval() -> u64 {
    30_000
}

fn default_backfill_blocks() -> u64 {
    100
}

fn default_max_block_range() -> u64 {
    2_000
}

impl ChainSettings {
    pub fn contract_address(&self) -> anyhow::Result<Address> {
        Address::from_str(self.contract_addr.trim()).with_context(|| {
            format!(
                "Invalid contract address {} for chain {}",
                self.contract_addr, self.name
            )
        })
    }
}

/// Points accrual configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct PointsSettings {
    /// Points per token unit per hour.
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// Fixed-point scale the rate is converted with.
    #[serde(default = "default_rate_scale")]
    pub rate_scale: u64,
    /// Accrual schedule, 5 or 6 cron fields or a descriptor such as `@hourly`.
    #[serde(default = "default_cron_spec")]
    pub cron_spec: String,
    /// How long shutdown waits for an accrual run in progress.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_rate() -> f64 {
    0.05
}

fn default_rate_scale() -> u64 {
    1_000
}

fn default_cron_spec() -> String {
    "0 * * * *".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for PointsSettings {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            rate_scale: default_rate_scale(),
            cron_spec: default_cron_spec(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Root application configuration.
///
/// Loaded from a config file (`config.yaml` by default) and overridden by
/// `POINTKEEPER__SECTION__KEY` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub chains: Vec<ChainSettings>,
    #[serde(default)]
    pub points: PointsSettings,
}

impl Settings {
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let settings = Self::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        settings.validate()?;

        Ok(settings)
    }

    fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("POINTKEEPER").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chains.is_empty() {
            bail!("No chains configured");
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            chain.contract_address()?;

            if !seen.insert(chain.chain_id) {
                bail!("Duplicate chain id {} in configuration", chain.chain_id);
            }
            if chain.max_block_range == 0 {
                bail!("max_block_range must be positive for chain {}", chain.name);
            }
        }

        if !self.points.rate.is_finite() || self.points.rate < 0.0 {
            bail!("Points rate must be a non-negative number, got {}", self.points.rate);
        }
        if self.points.rate_scale == 0 {
            bail!("Points rate_scale must be positive");
        }
        if self.points.cron_spec.trim().is_empty() {
            bail!("Points cron_spec must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const YAML: &str = r#"
postgres:
  host: localhost
  port: 5432
  user: postgres
  password: postgres
  database: points
chains:
  - name: sepolia
    chain_id: 11155111
    rpc_url: http://localhost:8545
    contract_addr: "0x1111111111111111111111111111111111111111"
"#;

    fn parse(yaml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let settings = parse(YAML);
        settings.validate().unwrap();

        assert_eq!(settings.postgres.pool_size, 16);
        assert_eq!(settings.postgres.connect_timeout_secs, 10);

        let chain = &settings.chains[0];
        assert_eq!(chain.start_block, 0);
        assert_eq!(chain.confirmations, 6);
        assert_eq!(chain.poll_interval_milliseconds, 30_000);
        assert_eq!(chain.backfill_blocks, 100);
        assert_eq!(chain.max_block_range, 2_000);

        assert_eq!(settings.points.rate, 0.05);
        assert_eq!(settings.points.rate_scale, 1_000);
        assert_eq!(settings.points.cron_spec, "0 * * * *");
        assert_eq!(settings.points.shutdown_grace_secs, 5);
    }

    #[test]
    fn test_rejects_duplicate_chain_ids() {
        let mut settings = parse(YAML);
        settings.chains.push(settings.chains[0].clone());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut settings = parse(YAML);
        settings.chains[0].contract_addr = "0x1234".to_string();
        assert!(settings.validate().is_err());

        let mut settings = parse(YAML);
        settings.points.rate = -0.1;
        assert!(settings.validate().is_err());

        let mut settings = parse(YAML);
        settings.points.rate_scale = 0;
        assert!(settings.validate().is_err());

        let mut settings = parse(YAML);
        settings.points.cron_spec = "  ".to_string();
        assert!(settings.validate().is_err());

        let mut settings = parse(YAML);
        settings.chains.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_example_config_loads() {
        let settings = Settings::new("config.example.yaml").unwrap();
        assert!(!settings.chains.is_empty());
        assert_eq!(settings.chains[0].start_block, 0);
    }
}
