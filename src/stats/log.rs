//! Write-path statistics.
//!
//! Counts what the aggregator and sweeper did, so operators can see how
//! heartbeats are being compacted without reading the store.

use crate::core::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the current process.
#[derive(Debug)]
pub struct WriteStats {
    /// Heartbeats accepted (including ignored ones)
    heartbeats: AtomicU64,
    /// Intervals opened for an entity with no prior history
    created: AtomicU64,
    /// Heartbeats that moved an open interval's end forward
    extended: AtomicU64,
    /// Duplicate heartbeats that changed nothing
    unchanged: AtomicU64,
    /// Intervals closed by a gap and replaced with a new one
    split: AtomicU64,
    /// Late heartbeats dropped
    ignored: AtomicU64,
    /// Transaction conflicts that were retried
    conflicts: AtomicU64,
    /// Intervals closed by the sweeper
    swept: AtomicU64,
    /// Process start time
    started_at: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl WriteStats {
    pub fn new() -> Self {
        Self {
            heartbeats: AtomicU64::new(0),
            created: AtomicU64::new(0),
            extended: AtomicU64::new(0),
            unchanged: AtomicU64::new(0),
            split: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            swept: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that continue from, and save back to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous write stats: {}", e);
        }

        stats
    }

    /// Record the outcome of one heartbeat.
    pub fn record_outcome(&self, outcome: Outcome) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Outcome::Created => &self.created,
            Outcome::Extended => &self.extended,
            Outcome::Unchanged => &self.unchanged,
            Outcome::Split => &self.split,
            Outcome::Ignored => &self.ignored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swept(&self, count: u64) {
        self.swept.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WriteStatsSnapshot {
        WriteStatsSnapshot {
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            extended: self.extended.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            split: self.split.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Write Statistics:\n\
             - Heartbeats: {}\n\
             - Intervals created: {}\n\
             - Intervals extended: {}\n\
             - Gap splits: {}\n\
             - Duplicates: {}\n\
             - Late heartbeats ignored: {}\n\
             - Conflicts retried: {}\n\
             - Intervals swept: {}",
            stats.heartbeats,
            stats.created,
            stats.extended,
            stats.split,
            stats.unchanged,
            stats.ignored,
            stats.conflicts,
            stats.swept
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                heartbeats: stats.heartbeats,
                created: stats.created,
                extended: stats.extended,
                unchanged: stats.unchanged,
                split: stats.split,
                ignored: stats.ignored,
                conflicts: stats.conflicts,
                swept: stats.swept,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.heartbeats.store(persisted.heartbeats, Ordering::Relaxed);
                self.created.store(persisted.created, Ordering::Relaxed);
                self.extended.store(persisted.extended, Ordering::Relaxed);
                self.unchanged.store(persisted.unchanged, Ordering::Relaxed);
                self.split.store(persisted.split, Ordering::Relaxed);
                self.ignored.store(persisted.ignored, Ordering::Relaxed);
                self.conflicts.store(persisted.conflicts, Ordering::Relaxed);
                self.swept.store(persisted.swept, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for WriteStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStatsSnapshot {
    pub heartbeats: u64,
    pub created: u64,
    pub extended: u64,
    pub unchanged: u64,
    pub split: u64,
    pub ignored: u64,
    pub conflicts: u64,
    pub swept: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    heartbeats: u64,
    created: u64,
    extended: u64,
    unchanged: u64,
    split: u64,
    ignored: u64,
    conflicts: u64,
    swept: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats.
pub type SharedWriteStats = Arc<WriteStats>;

pub fn create_shared_stats() -> SharedWriteStats {
    Arc::new(WriteStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedWriteStats {
    Arc::new(WriteStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_counting() {
        let stats = WriteStats::new();

        stats.record_outcome(Outcome::Created);
        stats.record_outcome(Outcome::Extended);
        stats.record_outcome(Outcome::Extended);
        stats.record_outcome(Outcome::Ignored);
        stats.record_conflict();

        let snap = stats.snapshot();
        assert_eq!(snap.heartbeats, 4);
        assert_eq!(snap.created, 1);
        assert_eq!(snap.extended, 2);
        assert_eq!(snap.ignored, 1);
        assert_eq!(snap.conflicts, 1);
        assert_eq!(snap.split, 0);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let stats = WriteStats::with_persistence(path.clone());
        stats.record_outcome(Outcome::Split);
        stats.record_swept(3);
        stats.save().unwrap();

        let reloaded = WriteStats::with_persistence(path);
        let snap = reloaded.snapshot();
        assert_eq!(snap.heartbeats, 1);
        assert_eq!(snap.split, 1);
        assert_eq!(snap.swept, 3);
    }

    #[test]
    fn test_summary_format() {
        let summary = WriteStats::new().summary();
        assert!(summary.contains("Heartbeats"));
        assert!(summary.contains("Conflicts retried"));
    }
}
