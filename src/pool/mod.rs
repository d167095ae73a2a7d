#[cfg(feature = "metrics")]
pub mod metrics;
pub mod pooled;
pub mod reaper;
pub mod resource;
pub mod stats;

#[cfg(feature = "metrics")]
pub use metrics::PoolMetrics;
pub use pooled::Lease;
pub use reaper::IdleReaper;
pub use resource::{PoolConfig, SessionPool};
pub use stats::PoolStats;
