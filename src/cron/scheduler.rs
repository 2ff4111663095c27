//! Cron scheduler for the points accrual job.
//!
//! Runs one accrual at startup and then on every tick of the configured
//! schedule. At most one run is active at a time; a tick that fires while a
//! run is still in progress is skipped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::PointsSettings;
use crate::db::LedgerStore;
use crate::points::PointsRate;

use super::jobs;
use super::jobs::accrue_points::AccrualSummary;

/// Turn a configured schedule into one the scheduler accepts.
///
/// Classic 5-field specs get a leading seconds field of `0`. Specs that
/// already carry seconds (6 fields) or a year (7 fields) and descriptors such
/// as `@hourly` pass through unchanged.
pub fn normalize_cron_spec(spec: &str) -> Result<String> {
    let spec = spec.trim();
    if spec.starts_with('@') {
        return Ok(spec.to_string());
    }

    let fields: Vec<&str> = spec.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => bail!("Invalid cron spec {:?}: expected 5 to 7 fields, got {}", spec, n),
    }
}

/// Runs accrual, at most once at a time.
#[derive(Clone)]
pub struct AccrualRunner {
    store: Arc<dyn LedgerStore>,
    rate: Arc<PointsRate>,
    guard: Arc<Mutex<()>>,
}

impl AccrualRunner {
    pub fn new(store: Arc<dyn LedgerStore>, rate: PointsRate) -> Self {
        Self {
            store,
            rate: Arc::new(rate),
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Run accrual now unless another run holds the guard.
    ///
    /// Returns `None` when the run was skipped or failed.
    pub async fn run_if_idle(&self, trigger: &str) -> Option<AccrualSummary> {
        let Ok(_running) = self.guard.try_lock() else {
            warn!(
                "Skipping {} accrual run: previous run still in progress",
                trigger
            );
            return None;
        };

        match jobs::accrue_points::run(self.store.as_ref(), &self.rate, Utc::now()).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!("Failed to accrue points ({} run): {:#}", trigger, e);
                None
            },
        }
    }

    /// Wait until no run is in progress.
    pub async fn wait_idle(&self) {
        let _idle = self.guard.lock().await;
    }
}

/// Cron scheduler that owns the accrual job.
pub struct PointsScheduler {
    runner: AccrualRunner,
    cron_spec: String,
    shutdown_grace: Duration,
}

impl PointsScheduler {
    pub fn new(store: Arc<dyn LedgerStore>, settings: &PointsSettings) -> Result<Self> {
        let rate = PointsRate::from_decimal(settings.rate, settings.rate_scale)?;
        let cron_spec = normalize_cron_spec(&settings.cron_spec)?;

        info!(
            "Points rate {}/{} per unit-hour, schedule {:?}",
            rate.numerator(),
            rate.denominator(),
            cron_spec
        );

        Ok(Self {
            runner: AccrualRunner::new(store, rate),
            cron_spec,
            shutdown_grace: Duration::from_secs(settings.shutdown_grace_secs),
        })
    }

    pub fn runner(&self) -> &AccrualRunner {
        &self.runner
    }

    /// Starts the scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_accrue_points_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Points scheduler started");

        let startup = self.runner.clone();
        let mut startup_run = tokio::spawn(async move {
            startup.run_if_idle("startup").await;
        });

        cancellation_token.cancelled().await;
        info!("Points scheduler shutting down...");

        scheduler.shutdown().await?;

        let runner = self.runner.clone();
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            let _ = (&mut startup_run).await;
            runner.wait_idle().await;
        })
        .await;

        if drained.is_err() {
            warn!(
                "Accrual run still in progress after {:?}, abandoning it",
                self.shutdown_grace
            );
            startup_run.abort();
        }

        info!("Points scheduler stopped");
        Ok(())
    }

    async fn register_accrue_points_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let runner = self.runner.clone();

        let job = Job::new_async(self.cron_spec.as_str(), move |_uuid, _lock| {
            let runner = runner.clone();
            Box::pin(async move {
                runner.run_if_idle("scheduled").await;
            })
        })
        .with_context(|| format!("Invalid cron spec {:?}", self.cron_spec))?;

        scheduler.add(job).await?;
        info!("Registered accrue_points job ({})", self.cron_spec);
        Ok(())
    }
}
