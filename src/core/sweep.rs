//! Closing intervals whose writer went silent.
//!
//! Without a later heartbeat an interval would stay open forever. The
//! sweeper closes every open interval whose end is more than the gap
//! threshold behind `now`. Each close is its own transaction fenced on the
//! entity's active-index key, and staleness is re-checked inside it, so a
//! heartbeat that lands during the sweep wins. Running a sweep twice closes
//! nothing the second time.

use crate::core::aggregator::exceeds_gap;
use crate::core::interval::{EntityKey, Interval};
use crate::core::retry::RetryPolicy;
use crate::error::{IntervalError, Result};
use crate::stats::SharedWriteStats;
use crate::store::{codec, keys, SharedStore, StoreTxn};
use serde::Serialize;

/// Result of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Open intervals looked at
    pub scanned: usize,
    /// Intervals closed by this sweep
    pub closed: Vec<Interval>,
    /// Entities skipped because writers kept winning
    pub contended: usize,
}

#[derive(Debug, Clone)]
pub struct StaleSweeper {
    store: SharedStore,
    gap_threshold: i64,
    retry: RetryPolicy,
    stats: Option<SharedWriteStats>,
}

impl StaleSweeper {
    pub fn new(store: SharedStore, gap_threshold: i64, retry: RetryPolicy) -> Self {
        Self {
            store,
            gap_threshold: gap_threshold.max(0),
            retry,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: SharedWriteStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Close every interval that has been silent for longer than the gap threshold.
    pub fn sweep(&self, now: i64) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for entity in self.open_entities()? {
            report.scanned += 1;
            let closed = self.retry.run(
                || {
                    self.store
                        .transact(|txn| self.close_if_stale(txn, &entity, now))
                },
                |_| {
                    if let Some(ref stats) = self.stats {
                        stats.record_conflict();
                    }
                },
            );

            match closed {
                Ok(Some(interval)) => report.closed.push(interval),
                Ok(None) => {}
                Err(IntervalError::WriteContention { attempts }) => {
                    tracing::warn!(entity = %entity, attempts, "sweep skipped contended entity");
                    report.contended += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(ref stats) = self.stats {
            stats.record_swept(report.closed.len() as u64);
        }
        tracing::info!(
            scanned = report.scanned,
            closed = report.closed.len(),
            contended = report.contended,
            "sweep finished"
        );
        Ok(report)
    }

    /// Entities that currently have an open interval.
    fn open_entities(&self) -> Result<Vec<EntityKey>> {
        let snapshot = self.store.snapshot();
        let root = keys::active_index_root();
        let entities = snapshot
            .scan_prefix(&root)
            .map(|item| {
                item.and_then(|(_, primary)| keys::decode_primary_key(&primary))
                    .map(|(entity, _)| entity)
            })
            .collect();
        entities
    }

    fn close_if_stale(
        &self,
        txn: &StoreTxn<'_>,
        entity: &EntityKey,
        now: i64,
    ) -> Result<Option<Interval>> {
        let active_key = keys::active_index_key(entity)?;
        let Some(primary) = txn.get_for_update(&active_key)? else {
            return Ok(None);
        };
        let bytes = txn.get(&primary)?.ok_or_else(|| {
            IntervalError::CorruptRecord(format!("open index of {entity} points at a missing interval"))
        })?;
        let mut interval = codec::decode(&bytes)?;

        if !interval.active || !exceeds_gap(now, interval.ts_end, self.gap_threshold) {
            return Ok(None);
        }

        interval.active = false;
        txn.put(&primary, &codec::encode(&interval)?)?;
        txn.delete(&active_key)?;
        Ok(Some(interval))
    }
}
