//! Conflict resolution.
//!
//! Strategies are pure: given a conflict and a way to look up evidence for
//! each `(agent, belief)` pair they pick a winner or refuse. Writing the
//! outcome back into sessions is the caller's job; [`ResolutionOutcome::writes`]
//! lists exactly which writes to perform.

mod strategies;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conflict::{Conflict, ConflictId, ConflictParty, ConflictType};
use crate::error::ValidationError;
use crate::session::Session;

use strategies::Selection;

/// Named resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Highest confidence wins.
    #[default]
    ConfidenceBased,
    /// Highest `justification_count * confidence` wins.
    EvidenceBased,
    /// The agent whose role matches the conflict's context type wins.
    AgentExpertise,
    /// Most recently created belief wins.
    Temporal,
    /// Strict majority among at least three agents.
    Consensus,
}

impl ResolutionStrategy {
    /// Returns a short stable identifier suitable for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ConfidenceBased => "confidence_based",
            Self::EvidenceBased => "evidence_based",
            Self::AgentExpertise => "agent_expertise",
            Self::Temporal => "temporal",
            Self::Consensus => "consensus",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confidence_based" => Ok(Self::ConfidenceBased),
            "evidence_based" => Ok(Self::EvidenceBased),
            "agent_expertise" => Ok(Self::AgentExpertise),
            "temporal" => Ok(Self::Temporal),
            "consensus" => Ok(Self::Consensus),
            other => Err(ValidationError::InvalidField {
                field: "resolution_strategy".to_string(),
                reason: format!("unknown strategy '{other}'"),
            }),
        }
    }
}

/// Evidence about one belief as held by one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefEvidence {
    /// Holding agent.
    pub agent: String,
    /// Belief name.
    pub belief: String,
    /// Validity in the holder's session.
    pub valid: Option<bool>,
    /// Confidence in the holder's session.
    pub confidence: f32,
    /// Justifications concluding the belief.
    pub justification_count: usize,
    /// Creation time; absent when built from a conflict party.
    pub created_at: Option<DateTime<Utc>>,
    /// `context["type"]` when set.
    pub context_type: Option<String>,
    /// Role of the holding agent, when known.
    pub role: Option<String>,
}

impl BeliefEvidence {
    /// Evidence taken from a conflict party alone.
    #[must_use]
    pub fn from_party(party: &ConflictParty) -> Self {
        Self {
            agent: party.agent.clone(),
            belief: party.belief.clone(),
            valid: party.valid,
            confidence: party.confidence,
            justification_count: 0,
            created_at: None,
            context_type: None,
            role: None,
        }
    }

    /// Reads evidence for `belief` out of a session.
    #[must_use]
    pub fn from_session(session: &Session, belief: &str, role: Option<&str>) -> Option<Self> {
        let node = session.graph().belief(belief)?;
        let extended = session.belief(belief);
        Some(Self {
            agent: session.owner().to_string(),
            belief: belief.to_string(),
            valid: node.valid(),
            confidence: extended.map_or(0.0, |b| b.confidence),
            justification_count: node.justifications().len(),
            created_at: extended.map(|b| b.created_at),
            context_type: extended.and_then(|b| b.context_type()).map(str::to_string),
            role: role.map(str::to_string),
        })
    }

    /// `justification_count * confidence`.
    #[must_use]
    pub fn evidence_score(&self) -> f64 {
        self.justification_count as f64 * f64::from(self.confidence)
    }
}

/// Resolves `(agent, belief)` pairs to evidence.
pub trait BeliefLookup {
    fn evidence(&self, agent: &str, belief: &str) -> Option<BeliefEvidence>;

    /// Every known holder of `belief`, used for consensus voting.
    fn holders(&self, belief: &str) -> Vec<BeliefEvidence> {
        let _ = belief;
        Vec::new()
    }
}

impl BeliefLookup for Session {
    fn evidence(&self, agent: &str, belief: &str) -> Option<BeliefEvidence> {
        if agent != self.owner() {
            return None;
        }
        BeliefEvidence::from_session(self, belief, None)
    }

    fn holders(&self, belief: &str) -> Vec<BeliefEvidence> {
        BeliefEvidence::from_session(self, belief, None).into_iter().collect()
    }
}

/// Evidence gathered up front from several sessions.
#[derive(Debug, Clone, Default)]
pub struct EvidenceTable {
    entries: BTreeMap<(String, String), BeliefEvidence>,
}

impl EvidenceTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces evidence for an (agent, belief) pair.
    pub fn insert(&mut self, evidence: BeliefEvidence) {
        self.entries
            .insert((evidence.agent.clone(), evidence.belief.clone()), evidence);
    }

    /// Records evidence for each named belief the session holds.
    pub fn collect_from<'a, I>(&mut self, session: &Session, role: Option<&str>, beliefs: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for belief in beliefs {
            if let Some(ev) = BeliefEvidence::from_session(session, belief, role) {
                self.insert(ev);
            }
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no evidence was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BeliefLookup for EvidenceTable {
    fn evidence(&self, agent: &str, belief: &str) -> Option<BeliefEvidence> {
        self.entries
            .get(&(agent.to_string(), belief.to_string()))
            .cloned()
    }

    fn holders(&self, belief: &str) -> Vec<BeliefEvidence> {
        self.entries
            .values()
            .filter(|e| e.belief == belief)
            .cloned()
            .collect()
    }
}

/// Maps a context type to the agent role trusted for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpertiseMap(BTreeMap<String, String>);

impl ExpertiseMap {
    /// Map with no preferences.
    #[must_use]
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Trusts `role` for `context_type`.
    #[must_use]
    pub fn with(mut self, context_type: impl Into<String>, role: impl Into<String>) -> Self {
        self.0.insert(context_type.into(), role.into());
        self
    }

    /// Role trusted for a context type.
    #[must_use]
    pub fn preferred_role(&self, context_type: &str) -> Option<&str> {
        self.0.get(context_type).map(String::as_str)
    }
}

impl Default for ExpertiseMap {
    fn default() -> Self {
        Self::empty()
            .with("hypothesis", "investigator")
            .with("validation", "validator")
    }
}

/// Decision produced by applying a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// A winner was chosen.
    Resolved {
        winner: ConflictParty,
        losers: Vec<ConflictParty>,
        reasoning: String,
    },
    /// No party could be preferred.
    Unresolved {
        reasoning: String,
    },
}

/// A validity write implied by an accepted resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionWrite {
    /// Agent whose session is written.
    pub agent: String,
    /// Belief to force.
    pub belief: String,
    /// Validity to force.
    pub valid: bool,
}

impl ResolutionOutcome {
    /// True when a winner was chosen.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    /// Human-readable explanation of the decision.
    #[must_use]
    pub fn reasoning(&self) -> &str {
        match self {
            Self::Resolved { reasoning, .. } | Self::Unresolved { reasoning } => reasoning,
        }
    }

    /// The chosen party, if any.
    #[must_use]
    pub const fn winner(&self) -> Option<&ConflictParty> {
        match self {
            Self::Resolved { winner, .. } => Some(winner),
            Self::Unresolved { .. } => None,
        }
    }

    /// Writes that apply this outcome. The winner is never written.
    ///
    /// Direct contradictions invalidate each losing belief. Validity conflicts
    /// copy the winner's validity onto each loser.
    #[must_use]
    pub fn writes(&self, conflict_type: ConflictType) -> Vec<ResolutionWrite> {
        let Self::Resolved { winner, losers, .. } = self else {
            return Vec::new();
        };
        losers
            .iter()
            .filter(|l| !l.same_holder(winner))
            .filter_map(|l| {
                let valid = match conflict_type {
                    ConflictType::DirectContradiction => Some(false),
                    ConflictType::ValidityConflict => winner.valid,
                    ConflictType::JustificationContradiction => None,
                }?;
                (l.valid != Some(valid)).then(|| ResolutionWrite {
                    agent: l.agent.clone(),
                    belief: l.belief.clone(),
                    valid,
                })
            })
            .collect()
    }
}

/// Audit record of one resolution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    /// Conflict that was resolved.
    pub conflict_id: ConflictId,
    /// Its type.
    pub conflict_type: ConflictType,
    /// Strategy applied.
    pub strategy: ResolutionStrategy,
    /// Decision reached.
    pub outcome: ResolutionOutcome,
    /// Writes that were actually applied.
    #[serde(default)]
    pub applied: Vec<ResolutionWrite>,
    /// When the attempt was made.
    pub resolved_at: DateTime<Utc>,
}

/// Capability interface for conflict resolution.
pub trait ConflictResolving: Send + Sync {
    fn resolve(
        &self,
        conflict: &Conflict,
        strategy: ResolutionStrategy,
        lookup: &dyn BeliefLookup,
    ) -> ResolutionOutcome;
}

/// The canonical resolver.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    expertise: ExpertiseMap,
}

impl ConflictResolver {
    /// Creates a resolver with the given expertise map.
    #[must_use]
    pub fn new(expertise: ExpertiseMap) -> Self {
        Self { expertise }
    }

    /// Expertise map in use.
    #[must_use]
    pub const fn expertise(&self) -> &ExpertiseMap {
        &self.expertise
    }
}

impl ConflictResolving for ConflictResolver {
    fn resolve(
        &self,
        conflict: &Conflict,
        strategy: ResolutionStrategy,
        lookup: &dyn BeliefLookup,
    ) -> ResolutionOutcome {
        if conflict.conflict_type == ConflictType::JustificationContradiction {
            return ResolutionOutcome::Unresolved {
                reasoning: "justification contradictions require revising the rule".to_string(),
            };
        }
        if conflict.parties.len() < 2 {
            return ResolutionOutcome::Unresolved {
                reasoning: "conflict has fewer than two parties".to_string(),
            };
        }

        let candidates: Vec<BeliefEvidence> = conflict
            .parties
            .iter()
            .map(|p| lookup.evidence(&p.agent, &p.belief).unwrap_or_else(|| BeliefEvidence::from_party(p)))
            .collect();

        let selection = match strategy {
            ResolutionStrategy::ConfidenceBased => strategies::confidence_based(&candidates),
            ResolutionStrategy::EvidenceBased => strategies::evidence_based(&candidates),
            ResolutionStrategy::Temporal => strategies::temporal(&candidates),
            ResolutionStrategy::AgentExpertise => {
                let context_type = conflict
                    .context_type
                    .as_deref()
                    .or_else(|| candidates.iter().find_map(|c| c.context_type.as_deref()));
                strategies::agent_expertise(&candidates, context_type, &self.expertise)
            }
            ResolutionStrategy::Consensus => {
                let mut holders = Vec::new();
                for belief in &conflict.beliefs {
                    holders.extend(lookup.holders(belief));
                }
                strategies::consensus(&candidates, &holders)
            }
        };

        let outcome = match selection {
            Selection::Winner { index, reasoning } => {
                let winner = conflict.parties[index].clone();
                let losers = conflict
                    .parties
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != index)
                    .map(|(_, p)| p.clone())
                    .collect();
                ResolutionOutcome::Resolved {
                    winner,
                    losers,
                    reasoning,
                }
            }
            Selection::Undecided(reasoning) => ResolutionOutcome::Unresolved { reasoning },
        };
        debug!(
            conflict = %conflict.id,
            strategy = %strategy,
            resolved = outcome.is_resolved(),
            reasoning = outcome.reasoning(),
            "conflict resolution"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::CollaboratorHandle;

    fn party(agent: &str, belief: &str, valid: bool, confidence: f32) -> ConflictParty {
        ConflictParty::new(agent, belief, Some(valid), confidence)
    }

    #[test]
    fn test_confidence_based_is_deterministic() {
        let conflict = Conflict::validity_conflict(party("s", "x", true, 0.9), party("w", "x", false, 0.4));
        let resolver = ConflictResolver::default();
        let table = EvidenceTable::new();
        for _ in 0..5 {
            let outcome = resolver.resolve(&conflict, ResolutionStrategy::ConfidenceBased, &table);
            assert_eq!(outcome.winner().unwrap().agent, "s");
        }
    }

    #[test]
    fn test_confidence_tie_is_unresolved() {
        let conflict = Conflict::validity_conflict(party("s", "x", true, 0.5), party("w", "x", false, 0.5));
        let outcome = ConflictResolver::default().resolve(&conflict, ResolutionStrategy::ConfidenceBased, &EvidenceTable::new());
        assert!(!outcome.is_resolved());
        assert!(outcome.writes(ConflictType::ValidityConflict).is_empty());
    }

    #[test]
    fn test_consensus_two_agents_unresolved() {
        let conflict = Conflict::validity_conflict(party("s", "x", true, 0.9), party("w", "x", false, 0.4));
        let outcome = ConflictResolver::default().resolve(&conflict, ResolutionStrategy::Consensus, &EvidenceTable::new());
        assert!(!outcome.is_resolved());
    }

    #[test]
    fn test_justification_contradiction_never_resolved() {
        let conflict = Conflict::justification_contradiction("s", "c", &["b".to_string()], 0.9);
        let outcome = ConflictResolver::default().resolve(&conflict, ResolutionStrategy::ConfidenceBased, &EvidenceTable::new());
        assert!(!outcome.is_resolved());
    }

    #[test]
    fn test_writes_for_direct_contradiction() {
        let conflict = Conflict::direct_contradiction(party("s", "rain", true, 0.9), party("w", "not_rain", true, 0.4));
        let outcome = ConflictResolver::default().resolve(&conflict, ResolutionStrategy::ConfidenceBased, &EvidenceTable::new());
        let writes = outcome.writes(conflict.conflict_type);
        assert_eq!(
            writes,
            vec![ResolutionWrite {
                agent: "w".to_string(),
                belief: "not_rain".to_string(),
                valid: false,
            }]
        );
    }

    #[test]
    fn test_writes_for_validity_conflict_copy_winner() {
        let conflict = Conflict::validity_conflict(party("s", "x", false, 0.9), party("w", "x", true, 0.4));
        let outcome = ConflictResolver::default().resolve(&conflict, ResolutionStrategy::ConfidenceBased, &EvidenceTable::new());
        let writes = outcome.writes(conflict.conflict_type);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].agent, "w");
        assert!(!writes[0].valid);
    }

    #[test]
    fn test_evidence_table_prefers_session_state() {
        let mut s = Session::new("s", CollaboratorHandle::none());
        s.add_justification(["a"], Vec::<String>::new(), "x", "s").unwrap();
        s.add_justification(["b"], Vec::<String>::new(), "x", "s").unwrap();
        s.set_fact("a", true, "s").unwrap();
        let mut w = Session::new("w", CollaboratorHandle::none());
        w.set_fact("x", false, "w").unwrap();

        let mut table = EvidenceTable::new();
        table.collect_from(&s, Some("investigator"), ["x"]);
        table.collect_from(&w, Some("validator"), ["x"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.holders("x").len(), 2);

        // Parties carry stale confidences; the lookup wins.
        let conflict = Conflict::validity_conflict(party("s", "x", true, 0.1), party("w", "x", false, 0.1));
        let outcome = ConflictResolver::default().resolve(&conflict, ResolutionStrategy::EvidenceBased, &table);
        assert_eq!(outcome.winner().unwrap().agent, "s");
    }

    #[test]
    fn test_session_lookup_only_answers_for_owner() {
        let mut s = Session::new("s", CollaboratorHandle::none());
        s.set_fact("x", true, "s").unwrap();
        assert!(s.evidence("s", "x").is_some());
        assert!(s.evidence("w", "x").is_none());
    }

    #[test]
    fn test_strategy_names_roundtrip() {
        for strategy in [
            ResolutionStrategy::ConfidenceBased,
            ResolutionStrategy::EvidenceBased,
            ResolutionStrategy::AgentExpertise,
            ResolutionStrategy::Temporal,
            ResolutionStrategy::Consensus,
        ] {
            assert_eq!(strategy.name().parse::<ResolutionStrategy>().unwrap(), strategy);
        }
        assert!("loudest".parse::<ResolutionStrategy>().is_err());
    }
}
