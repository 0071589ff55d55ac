//! Statistics for relay traffic

pub mod metrics;

pub use metrics::{RelayStats, RelayStatsSnapshot};
