//! Heartbeat Intervals - compacts liveness heartbeats into activity intervals.
//!
//! Entities identified by `(group, user, device)` send periodic heartbeats.
//! Heartbeats closer together than the gap threshold are merged into one
//! interval; a longer silence closes the interval and the next heartbeat
//! opens a new one.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Heartbeat Intervals                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Gateway   │──▶│ Aggregator  │──▶│   Interval  │       │
//! │  │   (HTTP)    │   │ (gap merge) │   │    Store    │       │
//! │  └─────────────┘   └─────────────┘   │  (RocksDB)  │       │
//! │         │                            └─────────────┘       │
//! │         ▼                                   ▲               │
//! │  ┌─────────────┐                     ┌─────────────┐       │
//! │  │   Query     │─────────────────────│   Sweeper   │       │
//! │  │  Service    │      (scans)        │ (stale open)│       │
//! │  └─────────────┘                     └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All coordination between concurrent writers happens through the store's
//! optimistic transactions; no component keeps interval state in memory.
//!
//! # Example
//!
//! ```no_run
//! use heartbeat_intervals::{core, store};
//!
//! let store = store::open_shared("/tmp/intervals").expect("Failed to open store");
//! let aggregator = core::HeartbeatAggregator::new(store.clone(), 60, core::RetryPolicy::default());
//!
//! aggregator.record_heartbeat("g1", "u1", "d1", 0).unwrap();
//! aggregator.record_heartbeat("g1", "u1", "d1", 30).unwrap();
//!
//! let query = core::QueryService::new(store);
//! assert_eq!(query.list_active().unwrap().len(), 1);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod stats;
pub mod store;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{
    EntityKey, Heartbeat, HeartbeatAggregator, Interval, Outcome, QueryService, RetryPolicy,
    StaleSweeper, SweepReport,
};
pub use error::IntervalError;
pub use stats::{SharedWriteStats, WriteStats, WriteStatsSnapshot};
pub use store::{IntervalStore, SharedStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
