//! Export/import documents exchanged between sessions and the hub.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{ExtendedBelief, HistoryAction, Session, SessionId};
use crate::conflict::{Conflict, ConflictParty};
use crate::error::TmsResult;
use crate::graph::{validate_name, Justification};

/// Justification as carried in an export; the conclusion is the map key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedJustification {
    /// Beliefs that must be valid.
    #[serde(rename = "in", default)]
    pub in_list: BTreeSet<String>,
    /// Beliefs that must not be valid.
    #[serde(rename = "out", default)]
    pub out_list: BTreeSet<String>,
}

/// One belief in an export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedBelief {
    /// Validity at export time.
    pub valid: Option<bool>,
    /// Validity depends on some belief being absent.
    #[serde(default)]
    pub non_monotonic: bool,
    /// Asserted premise value. Older documents omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asserted: Option<bool>,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Agent that created the belief.
    pub agent_source: String,
    /// Free-form context; `type` drives expertise resolution.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// When the belief was created.
    pub created_at: DateTime<Utc>,
    /// Justifications concluding this belief.
    #[serde(default)]
    pub justifications: Vec<ExportedJustification>,
}

impl ExportedBelief {
    /// Premise value carried by this entry.
    ///
    /// Falls back to `valid` for entries without justifications when the
    /// document does not record assertions explicitly.
    #[must_use]
    pub fn premise_value(&self) -> Option<bool> {
        self.asserted
            .or_else(|| if self.justifications.is_empty() { self.valid } else { None })
    }
}

/// Snapshot of a session, the wire contract between sessions and the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    /// Exporting session.
    pub session_id: SessionId,
    /// Agent that owns it.
    pub owner_agent: String,
    /// Session version at export time.
    #[serde(default)]
    pub version: u64,
    /// When the snapshot was taken.
    pub exported_at: DateTime<Utc>,
    /// Beliefs keyed by name.
    pub beliefs: BTreeMap<String, ExportedBelief>,
}

impl SessionExport {
    /// BLAKE3 digest of the canonical belief map, hex encoded.
    ///
    /// Two exports with equal belief content have equal digests regardless of
    /// when or by which session they were produced.
    pub fn digest(&self) -> TmsResult<String> {
        let bytes = serde_json::to_vec(&self.beliefs)
            .map_err(|e| crate::error::TmsError::internal(format!("export encoding: {e}")))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    /// Number of beliefs in the document.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beliefs.len()
    }

    /// True when the document carries no beliefs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beliefs.is_empty()
    }
}

/// How incoming premise values interact with local ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Never overwrite a determined local value; disagreements become conflicts.
    #[default]
    Merge,
    /// Incoming premise values win.
    Overwrite,
}

/// What an import changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Beliefs created locally.
    pub created: usize,
    /// Existing beliefs whose metadata changed.
    pub updated: usize,
    /// Justifications that were new locally.
    pub justifications_added: usize,
    /// Premise values written.
    pub facts_applied: usize,
    /// Premise values that were not applied because the local value differs.
    pub conflicts: Vec<Conflict>,
}

impl ImportReport {
    /// Total number of items moved into the session.
    #[must_use]
    pub fn items(&self) -> usize {
        self.created + self.updated + self.justifications_added + self.facts_applied
    }

    /// True when the import changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.items() == 0
    }
}

impl Session {
    /// Produces a value copy of the session for transfer.
    #[must_use]
    pub fn export(&self) -> SessionExport {
        let beliefs = self
            .beliefs
            .iter()
            .map(|(name, eb)| {
                let node = self.graph.belief(name);
                let exported = ExportedBelief {
                    valid: node.and_then(|n| n.valid()),
                    non_monotonic: node.is_some_and(|n| n.is_non_monotonic()),
                    asserted: node.and_then(|n| n.asserted()),
                    confidence: eb.confidence,
                    agent_source: eb.agent_source.clone(),
                    context: eb.context.clone(),
                    created_at: eb.created_at,
                    justifications: node
                        .map(|n| {
                            n.justifications()
                                .iter()
                                .map(|j| ExportedJustification {
                                    in_list: j.in_list.clone(),
                                    out_list: j.out_list.clone(),
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                };
                (name.clone(), exported)
            })
            .collect();

        SessionExport {
            session_id: self.id,
            owner_agent: self.owner.clone(),
            version: self.version,
            exported_at: Utc::now(),
            beliefs,
        }
    }

    /// Imports another session's export.
    ///
    /// Beliefs are created or merged first, then justifications are added
    /// verbatim (no contradiction rules are synthesized; they travel in the
    /// document), then premise values are applied. Importing the same
    /// document twice leaves the session as it was after the first import.
    pub fn import(&mut self, doc: &SessionExport, mode: ImportMode) -> TmsResult<ImportReport> {
        for (name, eb) in &doc.beliefs {
            validate_name(name)?;
            super::validate_confidence(eb.confidence)?;
            for ej in &eb.justifications {
                for mentioned in ej.in_list.iter().chain(&ej.out_list) {
                    validate_name(mentioned)?;
                }
            }
        }

        // Local premise state before this import's justifications propagate.
        // Beliefs absent here are created by the import and take the
        // incoming premise unconditionally.
        let prior: BTreeMap<&str, (Option<bool>, Option<bool>)> = doc
            .beliefs
            .keys()
            .filter_map(|name| {
                self.graph
                    .belief(name)
                    .map(|n| (name.as_str(), (n.valid(), n.asserted())))
            })
            .collect();

        let mut report = ImportReport::default();
        let agent = doc.owner_agent.as_str();
        let cap = self.config.max_history_entries;
        let details = json!({ "from": agent, "session": doc.session_id.to_string() });

        for (name, eb) in &doc.beliefs {
            if let Some(local) = self.beliefs.get_mut(name) {
                // A disagreeing value must not lend its confidence to the local one.
                let local_valid = self.graph.belief(name).and_then(|n| n.valid());
                let disagrees = matches!((eb.premise_value(), local_valid), (Some(a), Some(b)) if a != b);
                let confidence = if disagrees && mode == ImportMode::Merge {
                    local.confidence
                } else {
                    eb.confidence
                };
                if local.merge(&eb.context, confidence) {
                    local.record(HistoryAction::Imported, agent, details.clone(), cap);
                    report.updated += 1;
                }
            } else {
                self.graph.add_belief(name)?;
                let mut created =
                    ExtendedBelief::new(name.as_str(), eb.agent_source.as_str(), eb.context.clone(), eb.confidence, HistoryAction::Imported);
                created.created_at = eb.created_at;
                if let Some(first) = created.history.first_mut() {
                    first.details = details.clone();
                    first.agent = agent.to_string();
                }
                self.beliefs.insert(name.clone(), created);
                report.created += 1;
            }
        }

        for (name, eb) in &doc.beliefs {
            for ej in &eb.justifications {
                let justification = Justification {
                    in_list: ej.in_list.clone(),
                    out_list: ej.out_list.clone(),
                    conclusion: name.clone(),
                };
                let known = self
                    .graph
                    .belief(name)
                    .is_some_and(|n| n.justifications().iter().any(|j| j.same_rule(&justification)));
                if known {
                    continue;
                }
                for mentioned in justification.antecedents() {
                    if !self.beliefs.contains_key(mentioned) {
                        self.ensure_belief(mentioned, agent)?;
                        report.created += 1;
                    }
                }
                let wave = self.graph.add_justification(justification)?;
                self.stats.total_inferences += wave.evaluated as u64;
                report.justifications_added += 1;
            }
        }

        for (name, eb) in &doc.beliefs {
            let Some(incoming) = eb.premise_value() else {
                continue;
            };
            let asserted_now = self.graph.belief(name).and_then(|n| n.asserted());
            if asserted_now == Some(incoming) {
                continue;
            }
            let local_valid = prior.get(name.as_str()).and_then(|(valid, _)| *valid);
            let accept = match mode {
                ImportMode::Overwrite => true,
                ImportMode::Merge => match prior.get(name.as_str()) {
                    None => true,
                    Some((_, Some(asserted))) => *asserted == incoming,
                    Some((valid, None)) => valid.is_none() || *valid == Some(incoming),
                },
            };
            if accept {
                let wave = self.graph.set_validity(name, Some(incoming))?;
                self.stats.total_inferences += wave.evaluated as u64;
                if let Some(local) = self.beliefs.get_mut(name) {
                    local.record(HistoryAction::Imported, agent, json!({ "valid": incoming, "from": agent }), cap);
                }
                report.facts_applied += 1;
            } else {
                let local_confidence = self.beliefs.get(name).map_or(0.0, |b| b.confidence);
                let conflict = Conflict::validity_conflict(
                    ConflictParty::new(self.owner.as_str(), name.as_str(), local_valid, local_confidence),
                    ConflictParty::new(agent, name.as_str(), Some(incoming), eb.confidence),
                )
                .with_context_type(self.beliefs.get(name).and_then(|b| b.context_type()).map(str::to_string));
                report.conflicts.push(conflict);
            }
        }

        if !report.is_noop() {
            self.version += 1;
        }
        debug!(
            session = %self.id,
            from = agent,
            created = report.created,
            updated = report.updated,
            justifications = report.justifications_added,
            facts = report.facts_applied,
            conflicts = report.conflicts.len(),
            "import applied"
        );
        Ok(report)
    }
}
