//! Per-belief provenance: source agent, context, confidence, history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What happened to a belief.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// Created explicitly.
    Created,
    /// Created because a justification mentioned it.
    AutoCreated,
    /// Context or confidence merged in by an agent.
    UpdatedByAgent,
    /// Gained a justification.
    JustificationAdded,
    /// Asserted as a premise.
    FactAsserted,
    /// Validity set or cleared directly.
    ValidityForced,
    /// Written by an import.
    Imported,
    /// Validity written by a conflict resolution.
    ConflictResolution,
    /// Explored as a hypothesis.
    Hypothesized,
    /// Rolled back to a checkpoint.
    Restored,
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::AutoCreated => "auto_created",
            Self::UpdatedByAgent => "updated_by_agent",
            Self::JustificationAdded => "justification_added",
            Self::FactAsserted => "fact_asserted",
            Self::ValidityForced => "validity_forced",
            Self::Imported => "imported",
            Self::ConflictResolution => "conflict_resolution",
            Self::Hypothesized => "hypothesized",
            Self::Restored => "restored",
        };
        write!(f, "{s}")
    }
}

/// One modification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// What happened.
    pub action: HistoryAction,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Action-specific JSON.
    #[serde(default)]
    pub details: Value,
    /// Agent responsible.
    pub agent: String,
}

/// A belief wrapped with provenance metadata.
///
/// Owned by exactly one session; other agents only ever see copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedBelief {
    /// Belief name.
    pub name: String,
    /// Agent that created it.
    pub agent_source: String,
    /// Free-form context.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Modifications, oldest first, capped per session config.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ExtendedBelief {
    pub(crate) fn new(
        name: impl Into<String>,
        agent_source: impl Into<String>,
        context: Map<String, Value>,
        confidence: f32,
        action: HistoryAction,
    ) -> Self {
        let agent_source = agent_source.into();
        let created_at = Utc::now();
        Self {
            name: name.into(),
            history: vec![HistoryEntry {
                action,
                timestamp: created_at,
                details: Value::Null,
                agent: agent_source.clone(),
            }],
            agent_source,
            context,
            confidence,
            created_at,
        }
    }

    /// `context["type"]` when it is a string.
    #[must_use]
    pub fn context_type(&self) -> Option<&str> {
        self.context.get("type").and_then(Value::as_str)
    }

    /// Number of recorded modifications.
    #[must_use]
    pub fn modification_count(&self) -> usize {
        self.history.len()
    }

    /// Appends a history entry, keeping at most `cap` entries.
    pub(crate) fn record(&mut self, action: HistoryAction, agent: &str, details: Value, cap: usize) {
        self.history.push(HistoryEntry {
            action,
            timestamp: Utc::now(),
            details,
            agent: agent.to_string(),
        });
        let cap = cap.max(1);
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
    }

    /// Shallow context update plus `confidence = max(old, new)`.
    ///
    /// Returns true if anything changed.
    pub(crate) fn merge(&mut self, context: &Map<String, Value>, confidence: f32) -> bool {
        let mut changed = false;
        for (k, v) in context {
            if self.context.get(k) != Some(v) {
                self.context.insert(k.clone(), v.clone());
                changed = true;
            }
        }
        if confidence > self.confidence {
            self.confidence = confidence;
            changed = true;
        }
        changed
    }
}
