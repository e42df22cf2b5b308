//! Agent sessions.
//!
//! A [`Session`] owns one [`BeliefGraph`] and wraps each belief with
//! provenance ([`ExtendedBelief`]). It is owned and mutated by a single agent;
//! the hub only reads exports and writes back through `import`,
//! `set_validity`, and `apply_resolution`.

mod checkpoint;
mod export;
mod handle;
mod provenance;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::collaborator::CollaboratorHandle;
use crate::consistency::{ConsistencyChecking, ConsistencyReport};
use crate::error::{ExecutionError, TmsError, TmsResult, ValidationError};
use crate::graph::{validate_name, BeliefGraph, Explanation, Justification, PropagationWave};

pub use checkpoint::{Checkpoint, CheckpointId};
pub use export::{ExportedBelief, ImportMode, ImportReport, SessionExport};
pub use handle::SessionHandle;
pub use provenance::{ExtendedBelief, HistoryAction, HistoryEntry};

/// Name of the belief that surfaces default-negation conflicts.
pub const CONTRADICTION: &str = "_CONTRADICTION_";

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Checkpoints kept before the oldest is discarded.
    pub max_checkpoints: usize,
    /// History entries kept per belief.
    pub max_history_entries: usize,
    /// Confidence given to auto-created beliefs.
    pub default_confidence: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_checkpoints: 10,
            max_history_entries: 256,
            default_confidence: 0.5,
        }
    }
}

/// Counters tracked over a session's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Single-belief evaluations performed by propagation.
    pub total_inferences: u64,
    /// Consistency checks run against this session.
    pub consistency_checks: u64,
    /// Whether the latest check found the session consistent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_consistency_status: Option<bool>,
    /// Confidence score of the latest check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_confidence_score: Option<f32>,
}

/// One agent's belief store plus provenance metadata.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    owner: String,
    config: SessionConfig,
    graph: BeliefGraph,
    beliefs: BTreeMap<String, ExtendedBelief>,
    stats: SessionStats,
    checkpoints: VecDeque<Checkpoint>,
    version: u64,
    created_at: DateTime<Utc>,
    collaborators: CollaboratorHandle,
}

impl Session {
    /// Creates an empty session owned by `owner`.
    pub fn new(owner: impl Into<String>, collaborators: CollaboratorHandle) -> Self {
        Self::with_config(owner, SessionConfig::default(), collaborators)
    }

    /// Creates an empty session with explicit configuration.
    pub fn with_config(owner: impl Into<String>, config: SessionConfig, collaborators: CollaboratorHandle) -> Self {
        Self {
            id: SessionId::new(),
            owner: owner.into(),
            config,
            graph: BeliefGraph::new(),
            beliefs: BTreeMap::new(),
            stats: SessionStats::default(),
            checkpoints: VecDeque::new(),
            version: 0,
            created_at: Utc::now(),
            collaborators,
        }
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Agent that owns the session.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Monotonic counter bumped by every mutation.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Lifetime counters.
    #[must_use]
    pub const fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Read access to the underlying graph.
    #[must_use]
    pub const fn graph(&self) -> &BeliefGraph {
        &self.graph
    }

    /// Provenance record for a belief.
    #[must_use]
    pub fn belief(&self, name: &str) -> Option<&ExtendedBelief> {
        self.beliefs.get(name)
    }

    /// All provenance records in name order.
    pub fn beliefs(&self) -> impl Iterator<Item = &ExtendedBelief> {
        self.beliefs.values()
    }

    /// Number of beliefs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beliefs.len()
    }

    /// True when the session holds no beliefs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beliefs.is_empty()
    }

    /// Validity of a belief.
    pub fn is_valid(&self, name: &str) -> TmsResult<Option<bool>> {
        self.graph.is_valid(name)
    }

    /// Adds a belief or merges into an existing one.
    ///
    /// Existing beliefs get a shallow context update, `max(old, new)`
    /// confidence, and an `updated_by_agent` history entry.
    pub fn add_belief(
        &mut self,
        name: &str,
        agent: &str,
        context: Map<String, Value>,
        confidence: f32,
    ) -> TmsResult<()> {
        validate_confidence(confidence)?;
        let cap = self.config.max_history_entries;
        if let Some(existing) = self.beliefs.get_mut(name) {
            existing.merge(&context, confidence);
            existing.record(
                HistoryAction::UpdatedByAgent,
                agent,
                json!({ "confidence": confidence }),
                cap,
            );
        } else {
            self.graph.add_belief(name)?;
            self.beliefs.insert(
                name.to_string(),
                ExtendedBelief::new(name, agent, context, confidence, HistoryAction::Created),
            );
        }
        self.version += 1;
        Ok(())
    }

    /// Adds a justification and synthesizes one contradiction rule per
    /// negative premise: `(in ∪ {out_item}) -> _CONTRADICTION_`.
    pub fn add_justification<I, O, S, T>(
        &mut self,
        in_list: I,
        out_list: O,
        conclusion: &str,
        agent: &str,
    ) -> TmsResult<PropagationWave>
    where
        I: IntoIterator<Item = S>,
        O: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        let justification = Justification::new(in_list, out_list, conclusion);
        if justification.in_list.contains(conclusion) && justification.out_list.contains(conclusion) {
            return Err(ValidationError::SelfDefeatingJustification {
                conclusion: conclusion.to_string(),
            }
            .into());
        }
        // Reject before anything is created.
        for name in justification.mentioned() {
            validate_name(name)?;
        }

        let mentioned: Vec<String> = justification.mentioned().cloned().collect();
        for name in &mentioned {
            self.ensure_belief(name, agent)?;
        }

        let mut wave = self.graph.add_justification(justification.clone())?;

        if !justification.out_list.is_empty() {
            self.ensure_belief(CONTRADICTION, agent)?;
            for out_item in &justification.out_list {
                let mut premises = justification.in_list.clone();
                premises.insert(out_item.clone());
                let synthesized = Justification {
                    in_list: premises,
                    out_list: Default::default(),
                    conclusion: CONTRADICTION.to_string(),
                };
                merge_wave(&mut wave, self.graph.add_justification(synthesized)?);
            }
        }

        let cap = self.config.max_history_entries;
        if let Some(b) = self.beliefs.get_mut(conclusion) {
            b.record(
                HistoryAction::JustificationAdded,
                agent,
                json!({ "in": justification.in_list, "out": justification.out_list }),
                cap,
            );
        }
        self.after_wave(&wave);
        debug!(conclusion, agent, changed = wave.changed.len(), "session justification added");
        Ok(wave)
    }

    /// Asserts a fact, creating the belief if needed.
    pub fn set_fact(&mut self, name: &str, is_true: bool, agent: &str) -> TmsResult<PropagationWave> {
        self.ensure_belief(name, agent)?;
        let wave = self.graph.set_validity(name, Some(is_true))?;
        let cap = self.config.max_history_entries;
        if let Some(b) = self.beliefs.get_mut(name) {
            b.record(HistoryAction::FactAsserted, agent, json!({ "valid": is_true }), cap);
        }
        self.after_wave(&wave);
        Ok(wave)
    }

    /// Forces (or with `None`, clears) the validity of an existing belief.
    pub fn set_validity(&mut self, name: &str, valid: Option<bool>, agent: &str) -> TmsResult<PropagationWave> {
        if !self.beliefs.contains_key(name) {
            return Err(TmsError::belief_not_found(name));
        }
        let wave = self.graph.set_validity(name, valid)?;
        let cap = self.config.max_history_entries;
        if let Some(b) = self.beliefs.get_mut(name) {
            b.record(HistoryAction::ValidityForced, agent, json!({ "valid": valid }), cap);
        }
        self.after_wave(&wave);
        Ok(wave)
    }

    /// Writes a conflict-resolution outcome onto a belief.
    pub fn apply_resolution(
        &mut self,
        name: &str,
        valid: bool,
        agent: &str,
        details: Value,
    ) -> TmsResult<PropagationWave> {
        if !self.beliefs.contains_key(name) {
            return Err(TmsError::belief_not_found(name));
        }
        let wave = self.graph.set_validity(name, Some(valid))?;
        let cap = self.config.max_history_entries;
        if let Some(b) = self.beliefs.get_mut(name) {
            b.record(HistoryAction::ConflictResolution, agent, details, cap);
        }
        self.after_wave(&wave);
        Ok(wave)
    }

    /// Structured proof trace.
    pub fn explain(&self, name: &str) -> TmsResult<Explanation> {
        self.graph.explain(name)
    }

    /// Human-readable explanation combining the proof trace with provenance.
    ///
    /// When a formal prover is configured its verdict is appended; otherwise
    /// the explanation is based on direct justification only.
    pub fn explain_belief(&self, name: &str) -> TmsResult<String> {
        let explanation = self.graph.explain(name)?;
        let valid = self.graph.is_valid(name)?;
        let mut out = format!("Belief '{name}' is {}\n", describe_validity(valid));

        if let Some(b) = self.beliefs.get(name) {
            out.push_str(&format!(
                "Source agent: {}, confidence: {:.2}, modifications: {}\n",
                b.agent_source,
                b.confidence,
                b.modification_count()
            ));
        }
        if self.graph.belief(name).is_some_and(|n| n.is_non_monotonic()) {
            out.push_str("Warning: belief lies on a support cycle\n");
        }

        out.push_str("Proof:\n");
        out.push_str(&explanation.render());

        match self.collaborators.prove(name) {
            None => out.push_str("Formal proof: unavailable (direct justification only)\n"),
            Some(Ok(outcome)) => out.push_str(&format!(
                "Formal proof: provable={} confidence={:.2} method={}\n",
                outcome.provable, outcome.confidence, outcome.method
            )),
            Some(Err(e)) => {
                warn!(belief = name, error = %e, "formal prover failed");
                out.push_str(&format!("Formal proof: failed ({e}); direct justification only\n"));
            }
        }
        Ok(out)
    }

    /// Asks the text generator for a hypothesis and stores it as a belief.
    ///
    /// On collaborator failure nothing is added.
    pub fn hypothesize(&mut self, name: &str, prompt: &str, agent: &str, confidence: f32) -> TmsResult<String> {
        validate_name(name)?;
        validate_confidence(confidence)?;

        let text = self.collaborators.generate(prompt).map_err(|e| {
            warn!(belief = name, error = %e, "hypothesis generation failed; belief not added");
            TmsError::Collaborator(e)
        })?;

        let mut context = Map::new();
        context.insert("type".to_string(), Value::String("hypothesis".to_string()));
        context.insert("description".to_string(), Value::String(text.clone()));
        context.insert("prompt".to_string(), Value::String(prompt.to_string()));
        self.add_belief(name, agent, context, confidence)?;

        let cap = self.config.max_history_entries;
        if let Some(b) = self.beliefs.get_mut(name) {
            b.record(HistoryAction::Hypothesized, agent, Value::Null, cap);
        }
        Ok(text)
    }

    /// Snapshots the provenance map.
    pub fn create_checkpoint(&mut self, label: &str) -> CheckpointId {
        let checkpoint = Checkpoint::capture(label, self.version, &self.beliefs);
        let id = checkpoint.id;
        self.checkpoints.push_back(checkpoint);
        let cap = self.config.max_checkpoints.max(1);
        while self.checkpoints.len() > cap {
            self.checkpoints.pop_front();
        }
        debug!(session = %self.id, checkpoint = %id, label, "checkpoint created");
        id
    }

    /// Looks up a retained checkpoint.
    pub fn checkpoint(&self, id: CheckpointId) -> TmsResult<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.id == id).ok_or_else(|| {
            ExecutionError::CheckpointNotFound { id: id.to_string() }.into()
        })
    }

    /// Retained checkpoints, oldest first.
    pub fn checkpoints(&self) -> impl Iterator<Item = &Checkpoint> {
        self.checkpoints.iter()
    }

    /// Restores provenance records captured by a checkpoint.
    ///
    /// Beliefs created after the checkpoint keep their current records; the
    /// graph is not touched. Returns the number of records restored.
    pub fn restore_checkpoint(&mut self, id: CheckpointId, agent: &str) -> TmsResult<usize> {
        let snapshot = self.checkpoint(id)?.beliefs.clone();
        let cap = self.config.max_history_entries;
        let mut restored = 0;
        for (name, mut belief) in snapshot {
            if !self.beliefs.contains_key(&name) {
                continue;
            }
            belief.record(HistoryAction::Restored, agent, json!({ "checkpoint": id.to_string() }), cap);
            self.beliefs.insert(name, belief);
            restored += 1;
        }
        self.version += 1;
        Ok(restored)
    }

    /// Runs a consistency check and records its outcome.
    pub fn check_consistency(&mut self, checker: &dyn ConsistencyChecking) -> ConsistencyReport {
        let report = checker.check_global_consistency(self);
        self.stats.consistency_checks += 1;
        self.stats.last_consistency_status = Some(report.is_consistent);
        self.stats.last_confidence_score = Some(report.confidence_score);
        report
    }

    /// Creates the belief with an `auto_created` record if it does not exist.
    fn ensure_belief(&mut self, name: &str, agent: &str) -> TmsResult<()> {
        if self.beliefs.contains_key(name) {
            return Ok(());
        }
        self.graph.add_belief(name)?;
        self.beliefs.insert(
            name.to_string(),
            ExtendedBelief::new(
                name,
                agent,
                Map::new(),
                self.config.default_confidence,
                HistoryAction::AutoCreated,
            ),
        );
        Ok(())
    }

    fn after_wave(&mut self, wave: &PropagationWave) {
        self.stats.total_inferences += wave.evaluated as u64;
        self.version += 1;
    }
}

fn merge_wave(into: &mut PropagationWave, other: PropagationWave) {
    into.evaluated += other.evaluated;
    for name in other.changed {
        if !into.changed.contains(&name) {
            into.changed.push(name);
        }
    }
    into.flagged_non_monotonic.extend(other.flagged_non_monotonic);
    into.unsettled.extend(other.unsettled);
}

fn describe_validity(valid: Option<bool>) -> &'static str {
    match valid {
        Some(true) => "valid",
        Some(false) => "invalid",
        None => "undetermined",
    }
}

pub(crate) fn validate_confidence(confidence: f32) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
        return Err(ValidationError::ConfidenceOutOfRange { value: confidence });
    }
    Ok(())
}
