//! Consistency checking within one session and across two sessions.
//!
//! Reports are derived data: every check recomputes them from the current
//! belief state, and conflicts carry content-derived ids so that repeated
//! checks of an unchanged state agree.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::conflict::{Conflict, ConflictParty};
use crate::session::{Session, CONTRADICTION};

/// Prefix marking the negation of a belief (`rain` / `not_rain`).
pub const NEGATION_PREFIX: &str = "not_";

/// Name of the negation of `name`.
#[must_use]
pub fn negation_of(name: &str) -> String {
    format!("{NEGATION_PREFIX}{name}")
}

/// Result of checking one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// True when `total_issues` is zero.
    pub is_consistent: bool,
    /// Direct contradictions (`X` and `not_X` both valid).
    pub conflicts_detected: Vec<Conflict>,
    /// Justifications whose in- and out-lists overlap.
    pub logical_contradictions: Vec<Conflict>,
    /// Beliefs flagged by propagation as lying on a support cycle.
    pub non_monotonic_loops: Vec<String>,
    /// True when `_CONTRADICTION_` is currently valid.
    pub contradiction_derived: bool,
    /// Sum of every issue found.
    pub total_issues: usize,
    /// Beliefs in the checked session.
    pub total_beliefs: usize,
    /// `max(0, 1 - issues / beliefs)`, 1.0 for an empty session.
    pub confidence_score: f32,
}

impl ConsistencyReport {
    fn from_parts(
        conflicts_detected: Vec<Conflict>,
        logical_contradictions: Vec<Conflict>,
        non_monotonic_loops: Vec<String>,
        contradiction_derived: bool,
        total_beliefs: usize,
    ) -> Self {
        let total_issues = conflicts_detected.len()
            + logical_contradictions.len()
            + non_monotonic_loops.len()
            + usize::from(contradiction_derived);
        Self {
            is_consistent: total_issues == 0,
            conflicts_detected,
            logical_contradictions,
            non_monotonic_loops,
            contradiction_derived,
            total_issues,
            total_beliefs,
            confidence_score: confidence_score(total_issues, total_beliefs),
        }
    }

    /// All conflicts in the report, direct ones first.
    pub fn conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts_detected.iter().chain(self.logical_contradictions.iter())
    }
}

/// `max(0, 1 - issues / beliefs)`; an empty store is fully consistent.
#[must_use]
pub fn confidence_score(total_issues: usize, total_beliefs: usize) -> f32 {
    if total_beliefs == 0 {
        return 1.0;
    }
    (1.0 - total_issues as f32 / total_beliefs as f32).max(0.0)
}

/// Capability interface for consistency checks.
pub trait ConsistencyChecking: Send + Sync {
    /// Checks one session for internal contradictions.
    fn check_global_consistency(&self, session: &Session) -> ConsistencyReport;

    /// Compares two sessions held by different agents.
    fn compare_agents(&self, a: &Session, b: &Session) -> Vec<Conflict>;
}

/// The canonical checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencyChecker;

impl ConsistencyChecker {
    /// Creates a checker.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ConsistencyChecking for ConsistencyChecker {
    fn check_global_consistency(&self, session: &Session) -> ConsistencyReport {
        let graph = session.graph();
        let owner = session.owner();

        let mut direct = Vec::new();
        for node in graph.beliefs() {
            if node.valid() != Some(true) {
                continue;
            }
            let negated = negation_of(node.name());
            if graph.belief(&negated).and_then(|n| n.valid()) == Some(true) {
                direct.push(
                    Conflict::direct_contradiction(
                        party(session, owner, node.name()),
                        party(session, owner, &negated),
                    )
                    .with_context_type(context_type(session, node.name())),
                );
            }
        }

        let mut logical = Vec::new();
        for justification in graph.justifications() {
            let shared = justification.overlap();
            if shared.is_empty() {
                continue;
            }
            let confidence = session.belief(&justification.conclusion).map_or(0.0, |b| b.confidence);
            logical.push(
                Conflict::justification_contradiction(owner, &justification.conclusion, &shared, confidence)
                    .with_context_type(context_type(session, &justification.conclusion)),
            );
        }

        let non_monotonic = graph.non_monotonic_beliefs();
        let contradiction_derived = graph.belief(CONTRADICTION).and_then(|n| n.valid()) == Some(true);

        let report = ConsistencyReport::from_parts(direct, logical, non_monotonic, contradiction_derived, graph.len());
        if report.is_consistent {
            debug!(agent = owner, beliefs = report.total_beliefs, "session consistent");
        } else {
            warn!(
                agent = owner,
                direct = report.conflicts_detected.len(),
                logical = report.logical_contradictions.len(),
                non_monotonic = report.non_monotonic_loops.len(),
                contradiction_derived,
                "session inconsistent"
            );
        }
        report
    }

    fn compare_agents(&self, a: &Session, b: &Session) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        cross_direct(a, b, &mut conflicts);
        cross_direct(b, a, &mut conflicts);

        for node in a.graph().beliefs() {
            if node.name() == CONTRADICTION {
                continue;
            }
            let Some(va) = node.valid() else { continue };
            let Some(vb) = b.graph().belief(node.name()).and_then(|n| n.valid()) else {
                continue;
            };
            if va != vb {
                conflicts.push(
                    Conflict::validity_conflict(
                        party(a, a.owner(), node.name()),
                        party(b, b.owner(), node.name()),
                    )
                    .with_context_type(context_type(a, node.name()).or_else(|| context_type(b, node.name()))),
                );
            }
        }

        if !conflicts.is_empty() {
            debug!(a = a.owner(), b = b.owner(), conflicts = conflicts.len(), "cross-agent conflicts");
        }
        conflicts
    }
}

/// `X` valid in `holder`, `not_X` valid in `other`.
fn cross_direct(holder: &Session, other: &Session, out: &mut Vec<Conflict>) {
    for node in holder.graph().beliefs() {
        if node.name() == CONTRADICTION || node.valid() != Some(true) {
            continue;
        }
        let negated = negation_of(node.name());
        if other.graph().belief(&negated).and_then(|n| n.valid()) == Some(true) {
            out.push(
                Conflict::direct_contradiction(
                    party(holder, holder.owner(), node.name()),
                    party(other, other.owner(), &negated),
                )
                .with_context_type(context_type(holder, node.name())),
            );
        }
    }
}

fn party(session: &Session, agent: &str, belief: &str) -> ConflictParty {
    let valid = session.graph().belief(belief).and_then(|n| n.valid());
    let confidence = session.belief(belief).map_or(0.0, |b| b.confidence);
    ConflictParty::new(agent, belief, valid, confidence)
}

fn context_type(session: &Session, belief: &str) -> Option<String> {
    session
        .belief(belief)
        .and_then(|b| b.context_type())
        .map(str::to_string)
}
