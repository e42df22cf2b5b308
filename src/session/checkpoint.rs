//! Named snapshots of a session's provenance map.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::provenance::ExtendedBelief;

/// Unique identifier for a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(Uuid);

impl CheckpointId {
    /// Creates a new random checkpoint ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deep copy of the belief map at a point in time. The graph is not included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint id.
    pub id: CheckpointId,
    /// Caller-supplied label.
    pub label: String,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Session version when the snapshot was taken.
    pub version: u64,
    /// Provenance records keyed by name.
    pub beliefs: BTreeMap<String, ExtendedBelief>,
}

impl Checkpoint {
    pub(crate) fn capture(label: impl Into<String>, version: u64, beliefs: &BTreeMap<String, ExtendedBelief>) -> Self {
        Self {
            id: CheckpointId::new(),
            label: label.into(),
            created_at: Utc::now(),
            version,
            beliefs: beliefs.clone(),
        }
    }

    /// Number of beliefs captured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beliefs.len()
    }

    /// True if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beliefs.is_empty()
    }
}
