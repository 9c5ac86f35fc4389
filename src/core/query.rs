//! Read-only access to stored intervals.
//!
//! Every call reads from one store snapshot, so a listing never mixes
//! states from before and after a concurrent heartbeat.

use crate::core::interval::{EntityKey, Interval};
use crate::error::{IntervalError, Result};
use crate::store::{codec, keys, SharedStore, StoreSnapshot};

#[derive(Debug, Clone)]
pub struct QueryService {
    store: SharedStore,
}

impl QueryService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Look up an interval through the id index.
    ///
    /// Returns `Ok(None)` for an unknown id.
    pub fn get_by_id(&self, id: &str) -> Result<Option<Interval>> {
        let snapshot = self.store.snapshot();
        let Some(primary) = snapshot.get(&keys::id_index_key(id))? else {
            return Ok(None);
        };
        let interval = load_primary(&snapshot, &primary)?;
        if interval.id != id {
            return Err(IntervalError::CorruptRecord(format!(
                "id index entry {id} points at interval {}",
                interval.id
            )));
        }
        Ok(Some(interval))
    }

    /// Every interval, grouped by entity and ordered by start within each entity.
    pub fn list_all(&self) -> Result<Vec<Interval>> {
        let snapshot = self.store.snapshot();
        let root = keys::primary_root();
        let intervals = snapshot
            .scan_prefix(&root)
            .map(|item| item.and_then(|(_, value)| codec::decode(&value)))
            .collect();
        intervals
    }

    /// Open intervals only, read from the active index.
    pub fn list_active(&self) -> Result<Vec<Interval>> {
        let snapshot = self.store.snapshot();
        let root = keys::active_index_root();
        let mut active = Vec::new();
        for item in snapshot.scan_prefix(&root) {
            let (_, primary) = item?;
            let interval = load_primary(&snapshot, &primary)?;
            if !interval.active {
                return Err(IntervalError::CorruptRecord(format!(
                    "open index lists closed interval {}",
                    interval.id
                )));
            }
            active.push(interval);
        }
        Ok(active)
    }

    /// All intervals of one entity in start order.
    pub fn list_entity(&self, entity: &EntityKey) -> Result<Vec<Interval>> {
        let snapshot = self.store.snapshot();
        let prefix = keys::entity_prefix(entity)?;
        let intervals = snapshot
            .scan_prefix(&prefix)
            .map(|item| item.and_then(|(_, value)| codec::decode(&value)))
            .collect();
        intervals
    }
}

fn load_primary(snapshot: &StoreSnapshot<'_>, primary: &[u8]) -> Result<Interval> {
    let bytes = snapshot.get(primary)?.ok_or_else(|| {
        IntervalError::CorruptRecord("index entry points at a missing interval".to_string())
    })?;
    codec::decode(&bytes)
}
