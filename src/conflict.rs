//! Conflict types for tracking contradictions.
//!
//! Conflicts are explicit values, not errors. They are derived from the
//! current belief state on every consistency check; the id is computed from
//! the conflict's content so the same contradiction always carries the same id.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content-derived identifier for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Derives a stable id from a canonical key.
    #[must_use]
    pub fn derive(key: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()))
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The type of conflict between beliefs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// `X` and `not_X` are both valid.
    DirectContradiction,

    /// The same belief has different non-null validity in two sessions.
    ValidityConflict,

    /// A justification lists the same belief as premise and negative premise.
    JustificationContradiction,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectContradiction => write!(f, "direct_contradiction"),
            Self::ValidityConflict => write!(f, "validity_conflict"),
            Self::JustificationContradiction => write!(f, "justification_contradiction"),
        }
    }
}

/// One side of a conflict: a belief as held by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictParty {
    /// Holding agent.
    pub agent: String,
    /// Belief name.
    pub belief: String,
    /// Validity as held.
    pub valid: Option<bool>,
    /// Confidence as held.
    pub confidence: f32,
}

impl ConflictParty {
    /// Builds a party from its parts.
    pub fn new(agent: impl Into<String>, belief: impl Into<String>, valid: Option<bool>, confidence: f32) -> Self {
        Self {
            agent: agent.into(),
            belief: belief.into(),
            valid,
            confidence,
        }
    }

    /// True if this party refers to the same (agent, belief) pair.
    #[must_use]
    pub fn same_holder(&self, other: &Self) -> bool {
        self.agent == other.agent && self.belief == other.belief
    }
}

/// A detected incompatibility between beliefs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Conflict id.
    pub id: ConflictId,

    /// Kind of incompatibility.
    pub conflict_type: ConflictType,

    /// Belief names involved, deduplicated, in detection order.
    pub beliefs: Vec<String>,

    /// The holders of the conflicting beliefs.
    pub parties: Vec<ConflictParty>,

    /// `context.type` of the involved beliefs, when recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_type: Option<String>,

    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,

    /// Severity score (0.0 to 1.0, higher is more severe).
    pub severity: f32,
}

impl Conflict {
    fn new(conflict_type: ConflictType, parties: Vec<ConflictParty>) -> Self {
        let mut beliefs: Vec<String> = Vec::with_capacity(parties.len());
        for p in &parties {
            if !beliefs.contains(&p.belief) {
                beliefs.push(p.belief.clone());
            }
        }
        let mut key_parts: Vec<String> = parties
            .iter()
            .map(|p| format!("{}/{}", p.agent, p.belief))
            .collect();
        key_parts.sort();
        let key = format!("{conflict_type}|{}", key_parts.join("|"));

        Self {
            id: ConflictId::derive(&key),
            conflict_type,
            beliefs,
            parties,
            context_type: None,
            detected_at: Utc::now(),
            severity: 0.5,
        }
    }

    /// `belief` and its negation are both valid.
    #[must_use]
    pub fn direct_contradiction(positive: ConflictParty, negative: ConflictParty) -> Self {
        Self::new(ConflictType::DirectContradiction, vec![positive, negative]).with_severity(0.9)
    }

    /// Two holders disagree on the validity of the same belief.
    #[must_use]
    pub fn validity_conflict(a: ConflictParty, b: ConflictParty) -> Self {
        Self::new(ConflictType::ValidityConflict, vec![a, b]).with_severity(0.7)
    }

    /// A justification for `conclusion` mentions `shared` in both lists.
    #[must_use]
    pub fn justification_contradiction(
        agent: &str,
        conclusion: &str,
        shared: &[String],
        confidence: f32,
    ) -> Self {
        let mut parties = vec![ConflictParty::new(agent, conclusion, None, confidence)];
        parties.extend(
            shared
                .iter()
                .map(|s| ConflictParty::new(agent, s.clone(), None, confidence)),
        );
        Self::new(ConflictType::JustificationContradiction, parties).with_severity(0.6)
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: f32) -> Self {
        self.severity = severity.clamp(0.0, 1.0);
        self
    }

    /// Records the `context.type` of the involved beliefs.
    #[must_use]
    pub fn with_context_type(mut self, context_type: Option<String>) -> Self {
        self.context_type = context_type;
        self
    }

    /// Distinct agents involved, in party order.
    #[must_use]
    pub fn agents(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.parties.len());
        for p in &self.parties {
            if !out.contains(&p.agent.as_str()) {
                out.push(p.agent.as_str());
            }
        }
        out
    }

    /// True when more than one agent is involved.
    #[must_use]
    pub fn is_cross_agent(&self) -> bool {
        self.agents().len() > 1
    }

    /// True if the agent holds one of the conflicting beliefs.
    #[must_use]
    pub fn involves_agent(&self, agent: &str) -> bool {
        self.parties.iter().any(|p| p.agent == agent)
    }

    /// True if the belief is one of the conflicting beliefs.
    #[must_use]
    pub fn involves_belief(&self, belief: &str) -> bool {
        self.beliefs.iter().any(|b| b == belief)
    }

    /// Returns the number of conflicting beliefs.
    #[must_use]
    pub fn belief_count(&self) -> usize {
        self.beliefs.len()
    }
}

impl PartialEq for Conflict {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Conflict {}

impl std::hash::Hash for Conflict {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let holders: Vec<String> = self
            .parties
            .iter()
            .map(|p| format!("{}@{}", p.belief, p.agent))
            .collect();
        write!(f, "{}[{}]", self.conflict_type, holders.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party(agent: &str, belief: &str, conf: f32) -> ConflictParty {
        ConflictParty::new(agent, belief, Some(true), conf)
    }

    #[test]
    fn test_conflict_id_is_content_derived() {
        let a = Conflict::direct_contradiction(party("s", "rain", 0.9), party("s", "not_rain", 0.4));
        let b = Conflict::direct_contradiction(party("s", "rain", 0.1), party("s", "not_rain", 0.2));
        assert_eq!(a.id, b.id);
        assert_eq!(a, b);

        let c = Conflict::validity_conflict(party("s", "rain", 0.9), party("s", "not_rain", 0.4));
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_party_order_does_not_change_id() {
        let a = Conflict::validity_conflict(party("s", "x", 0.9), party("w", "x", 0.4));
        let b = Conflict::validity_conflict(party("w", "x", 0.4), party("s", "x", 0.9));
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_agents_and_beliefs() {
        let c = Conflict::validity_conflict(party("s", "x", 0.9), party("w", "x", 0.4));
        assert_eq!(c.agents(), vec!["s", "w"]);
        assert_eq!(c.beliefs, vec!["x".to_string()]);
        assert!(c.is_cross_agent());
        assert!(c.involves_agent("w"));
        assert!(!c.involves_agent("z"));
    }

    #[test]
    fn test_justification_contradiction() {
        let c = Conflict::justification_contradiction("s", "c", &["b".to_string()], 0.5);
        assert_eq!(c.conflict_type, ConflictType::JustificationContradiction);
        assert_eq!(c.beliefs, vec!["c".to_string(), "b".to_string()]);
        assert!(!c.is_cross_agent());
    }

    #[test]
    fn test_conflict_severity_clamping() {
        let c = Conflict::validity_conflict(party("s", "x", 0.9), party("w", "x", 0.4)).with_severity(1.5);
        assert!((c.severity - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_conflict_type_display() {
        assert_eq!(format!("{}", ConflictType::DirectContradiction), "direct_contradiction");
        assert_eq!(format!("{}", ConflictType::ValidityConflict), "validity_conflict");
    }

    #[test]
    fn test_conflict_serialization() {
        let c = Conflict::validity_conflict(party("s", "x", 0.9), party("w", "x", 0.4));
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("validity_conflict"));
        let back: Conflict = serde_json::from_str(&json).unwrap();
        assert_eq!(c.id, back.id);
    }
}
