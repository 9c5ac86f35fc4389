//! Interval and heartbeat types.
//!
//! An [`Interval`] is a contiguous span of activity for one entity, built
//! from heartbeats that arrived no further apart than the gap threshold.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The `(group, user, device)` triple identifying a heartbeat source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    #[serde(rename = "g")]
    pub group: String,
    #[serde(rename = "u")]
    pub user: String,
    #[serde(rename = "d")]
    pub device: String,
}

impl EntityKey {
    pub fn new(group: impl Into<String>, user: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            user: user.into(),
            device: device.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.user, self.device)
    }
}

/// A single liveness signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(flatten)]
    pub entity: EntityKey,
    /// Epoch timestamp of the signal
    #[serde(rename = "ts")]
    pub timestamp: i64,
}

impl Heartbeat {
    pub fn new(entity: EntityKey, timestamp: i64) -> Self {
        Self { entity, timestamp }
    }
}

/// A persisted activity interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    /// Opaque identifier assigned at creation
    pub id: String,
    #[serde(rename = "tsStart")]
    pub ts_start: i64,
    #[serde(rename = "tsEnd")]
    pub ts_end: i64,
    #[serde(rename = "g")]
    pub group: String,
    #[serde(rename = "u")]
    pub user: String,
    #[serde(rename = "d")]
    pub device: String,
    /// Whether the interval still accepts heartbeats
    pub active: bool,
}

impl Interval {
    /// Open a fresh single-point interval at `timestamp`.
    pub fn open(entity: &EntityKey, timestamp: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts_start: timestamp,
            ts_end: timestamp,
            group: entity.group.clone(),
            user: entity.user.clone(),
            device: entity.device.clone(),
            active: true,
        }
    }

    pub fn entity(&self) -> EntityKey {
        EntityKey::new(&self.group, &self.user, &self.device)
    }

    pub fn is_open(&self) -> bool {
        self.active
    }

    /// Length of the interval in epoch units.
    pub fn duration(&self) -> i64 {
        self.ts_end.saturating_sub(self.ts_start)
    }

    /// Check whether `other` shares any instant with this interval.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.ts_start <= other.ts_end && other.ts_start <= self.ts_end
    }
}
