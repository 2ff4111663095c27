pub mod jobs;
pub mod scheduler;

pub use jobs::accrue_points::AccrualSummary;
pub use scheduler::{normalize_cron_spec, AccrualRunner, PointsScheduler};
