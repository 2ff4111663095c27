//! Time-weighted points accrual.
//!
//! Pure computation only; reading the change log and applying awards is the
//! job of [`cron::jobs::accrue_points`](crate::cron::jobs::accrue_points).

pub mod accrual;
pub mod rate;

pub use accrual::compute_awards;
pub use rate::PointsRate;
