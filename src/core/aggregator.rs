//! Heartbeat aggregation into intervals.
//!
//! Each heartbeat is applied in one optimistic transaction:
//!
//! 1. Fence the entity's active-index key and find its most recent interval
//! 2. No interval yet: open one at the heartbeat
//! 3. Most recent is closed, or the heartbeat is more than the gap threshold
//!    past its end: close it and open a new one
//! 4. Otherwise extend the open interval's end to the heartbeat
//!
//! Heartbeats older than the most recent interval are late deliveries and
//! are dropped without an error. Conflicting transactions are retried with
//! the configured [`RetryPolicy`].

use crate::core::interval::{EntityKey, Heartbeat, Interval};
use crate::core::retry::RetryPolicy;
use crate::error::{IntervalError, Result};
use crate::stats::SharedWriteStats;
use crate::store::{codec, keys, SharedStore, StoreTxn};
use serde::{Deserialize, Serialize};

/// What a heartbeat did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A new interval was opened
    Created,
    /// The open interval's end moved forward
    Extended,
    /// The heartbeat fell inside the open interval
    Unchanged,
    /// The open interval was closed by a gap and a new one opened
    Split,
    /// Late heartbeat, nothing written
    Ignored,
}

/// Decision taken against the most recent interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Open,
    CloseAndOpen,
    Extend,
    Keep,
    Drop,
}

pub(crate) fn exceeds_gap(timestamp: i64, ts_end: i64, gap_threshold: i64) -> bool {
    i128::from(timestamp) - i128::from(ts_end) > i128::from(gap_threshold)
}

fn decide(latest: Option<&Interval>, timestamp: i64, gap_threshold: i64) -> Step {
    let Some(latest) = latest else {
        return Step::Open;
    };
    if timestamp < latest.ts_start {
        return Step::Drop;
    }
    if !latest.active {
        // A closed interval is frozen; only heartbeats past its end start a new one.
        return if timestamp <= latest.ts_end {
            Step::Drop
        } else {
            Step::Open
        };
    }
    if exceeds_gap(timestamp, latest.ts_end, gap_threshold) {
        Step::CloseAndOpen
    } else if timestamp <= latest.ts_end {
        Step::Keep
    } else {
        Step::Extend
    }
}

/// Most recent interval of an entity, read inside `txn`, with its primary key.
///
/// Fences the entity's active-index key, so any concurrent write for the
/// same entity aborts this transaction at commit.
fn latest_for_update(
    txn: &StoreTxn<'_>,
    entity: &EntityKey,
) -> Result<Option<(Vec<u8>, Interval)>> {
    let active_key = keys::active_index_key(entity)?;
    if let Some(primary) = txn.get_for_update(&active_key)? {
        let bytes = txn.get(&primary)?.ok_or_else(|| {
            IntervalError::CorruptRecord(format!("open index of {entity} points at a missing interval"))
        })?;
        return Ok(Some((primary, codec::decode(&bytes)?)));
    }

    let prefix = keys::entity_prefix(entity)?;
    match txn.last_with_prefix(&prefix, &keys::entity_upper_bound(&prefix))? {
        Some((key, value)) => Ok(Some((key.into_vec(), codec::decode(&value)?))),
        None => Ok(None),
    }
}

/// Write a brand-new open interval with both of its index entries.
fn insert_open(txn: &StoreTxn<'_>, entity: &EntityKey, timestamp: i64) -> Result<Interval> {
    let interval = Interval::open(entity, timestamp);
    let primary = keys::primary_key(entity, timestamp)?;

    txn.put(&primary, &codec::encode(&interval)?)?;
    txn.put(&keys::id_index_key(&interval.id), &primary)?;
    txn.put(&keys::active_index_key(entity)?, &primary)?;
    Ok(interval)
}

/// Applies heartbeats to the interval store.
#[derive(Debug, Clone)]
pub struct HeartbeatAggregator {
    store: SharedStore,
    gap_threshold: i64,
    retry: RetryPolicy,
    stats: Option<SharedWriteStats>,
}

impl HeartbeatAggregator {
    /// Create an aggregator merging heartbeats no more than `gap_threshold` apart.
    pub fn new(store: SharedStore, gap_threshold: i64, retry: RetryPolicy) -> Self {
        Self {
            store,
            gap_threshold: gap_threshold.max(0),
            retry,
            stats: None,
        }
    }

    /// Count outcomes and conflicts into `stats`.
    pub fn with_stats(mut self, stats: SharedWriteStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn gap_threshold(&self) -> i64 {
        self.gap_threshold
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Record one heartbeat and return the interval it touched.
    ///
    /// A late heartbeat returns the entity's most recent interval unchanged.
    pub fn record_heartbeat(
        &self,
        group: &str,
        user: &str,
        device: &str,
        timestamp: i64,
    ) -> Result<Interval> {
        let heartbeat = Heartbeat::new(EntityKey::new(group, user, device), timestamp);
        self.record(&heartbeat).map(|(interval, _)| interval)
    }

    /// Record one heartbeat, reporting what it changed.
    pub fn record(&self, heartbeat: &Heartbeat) -> Result<(Interval, Outcome)> {
        // Reject unusable identifiers before opening a transaction.
        keys::encode_entity(&heartbeat.entity)?;

        let result = self.retry.run(
            || {
                self.store
                    .transact(|txn| self.apply(txn, &heartbeat.entity, heartbeat.timestamp))
            },
            |attempt| {
                if let Some(ref stats) = self.stats {
                    stats.record_conflict();
                }
                tracing::debug!(entity = %heartbeat.entity, attempt, "heartbeat conflicted");
            },
        );

        match result {
            Ok((interval, outcome)) => {
                if let Some(ref stats) = self.stats {
                    stats.record_outcome(outcome);
                }
                tracing::trace!(
                    entity = %heartbeat.entity,
                    ts = heartbeat.timestamp,
                    ?outcome,
                    "heartbeat applied"
                );
                Ok((interval, outcome))
            }
            Err(e) => {
                tracing::warn!(entity = %heartbeat.entity, "heartbeat failed: {}", e);
                Err(e)
            }
        }
    }

    fn apply(
        &self,
        txn: &StoreTxn<'_>,
        entity: &EntityKey,
        timestamp: i64,
    ) -> Result<(Interval, Outcome)> {
        let Some((primary, mut current)) = latest_for_update(txn, entity)? else {
            return Ok((insert_open(txn, entity, timestamp)?, Outcome::Created));
        };

        match decide(Some(&current), timestamp, self.gap_threshold) {
            Step::Open => Ok((insert_open(txn, entity, timestamp)?, Outcome::Created)),
            Step::CloseAndOpen => {
                current.active = false;
                txn.put(&primary, &codec::encode(&current)?)?;
                tracing::debug!(
                    entity = %entity,
                    id = %current.id,
                    ts_end = current.ts_end,
                    "interval closed by gap"
                );
                Ok((insert_open(txn, entity, timestamp)?, Outcome::Split))
            }
            Step::Extend => {
                current.ts_end = current.ts_end.max(timestamp);
                txn.put(&primary, &codec::encode(&current)?)?;
                Ok((current, Outcome::Extended))
            }
            Step::Keep => Ok((current, Outcome::Unchanged)),
            Step::Drop => Ok((current, Outcome::Ignored)),
        }
    }
}
