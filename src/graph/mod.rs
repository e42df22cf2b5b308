//! Belief graph with justification-based truth maintenance.
//!
//! A [`BeliefGraph`] stores one agent's beliefs and the justifications between
//! them. Every mutation triggers a propagation wave that re-establishes the
//! truth-maintenance invariant before the call returns: a belief is valid iff
//! it was asserted as a fact, or at least one of its justifications holds.

mod explain;
mod justification;
mod propagation;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TmsResult, ValidationError};

pub use explain::Explanation;
pub use justification::Justification;
pub use propagation::PropagationWave;

/// A named proposition with a validity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefNode {
    name: String,
    valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    asserted: Option<bool>,
    #[serde(default)]
    non_monotonic: bool,
    #[serde(default)]
    justifications: Vec<Justification>,
    #[serde(default)]
    implications: BTreeSet<String>,
}

impl BeliefNode {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            valid: None,
            asserted: None,
            non_monotonic: false,
            justifications: Vec::new(),
            implications: BTreeSet::new(),
        }
    }

    /// The belief name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current validity (`None` = undetermined).
    #[must_use]
    pub const fn valid(&self) -> Option<bool> {
        self.valid
    }

    /// Asserted premise value, if this belief was forced as a fact.
    #[must_use]
    pub const fn asserted(&self) -> Option<bool> {
        self.asserted
    }

    /// True when propagation found this belief on a support cycle.
    #[must_use]
    pub const fn is_non_monotonic(&self) -> bool {
        self.non_monotonic
    }

    /// True when the belief is an asserted premise.
    #[must_use]
    pub const fn is_premise(&self) -> bool {
        self.asserted.is_some()
    }

    /// Justifications concluding this belief, in insertion order.
    #[must_use]
    pub fn justifications(&self) -> &[Justification] {
        &self.justifications
    }

    /// Beliefs whose justifications mention this one.
    #[must_use]
    pub fn implications(&self) -> &BTreeSet<String> {
        &self.implications
    }
}

/// Stores beliefs and justifications for one agent and keeps validity current.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeliefGraph {
    nodes: BTreeMap<String, BeliefNode>,
    #[serde(default)]
    waves: u64,
    #[serde(default)]
    evaluations: u64,
}

impl BeliefGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of beliefs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the graph holds no beliefs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True if a belief with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Looks up a belief.
    #[must_use]
    pub fn belief(&self, name: &str) -> Option<&BeliefNode> {
        self.nodes.get(name)
    }

    /// Iterates over beliefs in name order.
    pub fn beliefs(&self) -> impl Iterator<Item = &BeliefNode> {
        self.nodes.values()
    }

    /// Iterates over every justification in the graph.
    pub fn justifications(&self) -> impl Iterator<Item = &Justification> {
        self.nodes.values().flat_map(|n| n.justifications.iter())
    }

    /// Names of currently valid beliefs.
    #[must_use]
    pub fn valid_beliefs(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.valid == Some(true))
            .map(|n| n.name.clone())
            .collect()
    }

    /// Names of beliefs flagged as non-monotonic.
    #[must_use]
    pub fn non_monotonic_beliefs(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.non_monotonic)
            .map(|n| n.name.clone())
            .collect()
    }

    /// Direct dependents of a belief.
    pub fn dependents(&self, name: &str) -> TmsResult<Vec<String>> {
        let node = self.node(name)?;
        Ok(node.implications.iter().cloned().collect())
    }

    /// Number of propagation waves run so far.
    #[must_use]
    pub const fn wave_count(&self) -> u64 {
        self.waves
    }

    /// Number of single-belief evaluations performed across all waves.
    #[must_use]
    pub const fn evaluation_count(&self) -> u64 {
        self.evaluations
    }

    /// Adds an undetermined belief. Idempotent.
    ///
    /// Returns true if the belief was created.
    pub fn add_belief(&mut self, name: &str) -> Result<bool, ValidationError> {
        validate_name(name)?;
        if self.nodes.contains_key(name) {
            return Ok(false);
        }
        self.nodes.insert(name.to_string(), BeliefNode::new(name));
        Ok(true)
    }

    /// Adds a justification, creating any referenced belief that does not exist,
    /// and propagates the consequences.
    ///
    /// An identical rule (same conclusion, same in/out sets) is not added twice;
    /// the returned wave is then empty.
    pub fn add_justification(&mut self, justification: Justification) -> TmsResult<PropagationWave> {
        for name in justification.mentioned() {
            validate_name(name)?;
        }
        for name in justification.mentioned() {
            if !self.nodes.contains_key(name) {
                self.nodes.insert(name.clone(), BeliefNode::new(name.as_str()));
            }
        }

        let conclusion = justification.conclusion.clone();
        let duplicate = self.nodes[&conclusion]
            .justifications
            .iter()
            .any(|j| j.same_rule(&justification));
        if duplicate {
            return Ok(PropagationWave::default());
        }

        for antecedent in justification.antecedents() {
            if let Some(node) = self.nodes.get_mut(antecedent) {
                node.implications.insert(conclusion.clone());
            }
        }
        if let Some(node) = self.nodes.get_mut(&conclusion) {
            node.justifications.push(justification);
        }

        debug!(conclusion = %conclusion, "justification added");
        Ok(self.propagate_from(&conclusion))
    }

    /// Asserts (or with `None`, clears) a premise value and propagates.
    pub fn set_validity(&mut self, name: &str, valid: Option<bool>) -> TmsResult<PropagationWave> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| crate::error::TmsError::belief_not_found(name))?;
        node.asserted = valid;
        Ok(self.propagate_from(name))
    }

    /// Current validity of a belief.
    pub fn is_valid(&self, name: &str) -> TmsResult<Option<bool>> {
        Ok(self.node(name)?.valid)
    }

    /// Builds a proof trace for a belief.
    pub fn explain(&self, name: &str) -> TmsResult<Explanation> {
        self.node(name)?;
        let mut visiting = BTreeSet::new();
        Ok(self.explain_inner(name, &mut visiting))
    }

    fn node(&self, name: &str) -> TmsResult<&BeliefNode> {
        self.nodes
            .get(name)
            .ok_or_else(|| crate::error::TmsError::belief_not_found(name))
    }

    fn validity(&self, name: &str) -> Option<bool> {
        self.nodes.get(name).and_then(|n| n.valid)
    }

    /// True iff every in-member is valid and no out-member is valid.
    #[must_use]
    pub fn holds(&self, justification: &Justification) -> bool {
        justification
            .in_list
            .iter()
            .all(|n| self.validity(n) == Some(true))
            && !justification
                .out_list
                .iter()
                .any(|n| self.validity(n) == Some(true))
    }

    /// Evaluates a belief against the current validity of its antecedents.
    fn evaluate(&self, name: &str) -> Option<bool> {
        let node = self.nodes.get(name)?;
        if let Some(v) = node.asserted {
            return Some(v);
        }
        if node.justifications.is_empty() {
            return None;
        }
        Some(node.justifications.iter().any(|j| self.holds(j)))
    }
}

/// Longest accepted belief name, in bytes.
pub const MAX_BELIEF_NAME_LEN: usize = 256;

pub(crate) fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyBeliefName);
    }
    if name.len() > MAX_BELIEF_NAME_LEN {
        return Err(ValidationError::FieldTooLong {
            field: "belief".to_string(),
            max_length: MAX_BELIEF_NAME_LEN,
        });
    }
    Ok(())
}
