//! Core functionality of the interval service.
//!
//! This module contains:
//! - The interval and heartbeat model
//! - Heartbeat aggregation (the write path)
//! - Read-only queries
//! - Sweeping of intervals whose writer went silent

pub mod aggregator;
pub mod interval;
pub mod query;
pub mod retry;
pub mod sweep;

// Re-export commonly used types
pub use aggregator::{HeartbeatAggregator, Outcome};
pub use interval::{EntityKey, Heartbeat, Interval};
pub use query::QueryService;
pub use retry::RetryPolicy;
pub use sweep::{StaleSweeper, SweepReport};
