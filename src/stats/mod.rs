//! Operational statistics for the write path.

pub mod log;

pub use log::{
    create_shared_stats, create_shared_stats_with_persistence, SharedWriteStats, WriteStats,
    WriteStatsSnapshot,
};
