//! Proof traces for beliefs.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::{BeliefGraph, Justification};

/// Structured explanation of why a belief has its current validity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Explanation {
    /// An asserted fact: the trace stops here.
    Premise {
        belief: String,
        valid: Option<bool>,
    },

    /// A holding justification, with the in-members explained recursively.
    Supported {
        belief: String,
        justification: Justification,
        premises: Vec<Explanation>,
        /// Out-members that are currently not valid.
        absent_defeaters: Vec<String>,
    },

    /// No justification holds; shows the most recently added one.
    Unsupported {
        belief: String,
        valid: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        attempted: Option<Justification>,
        /// In-members that are not valid.
        failing_in: Vec<String>,
        /// Out-members that are valid.
        blocking_out: Vec<String>,
    },

    /// The trace re-entered a belief already being explained.
    Circular {
        belief: String,
    },
}

impl Explanation {
    /// The belief this node explains.
    #[must_use]
    pub fn belief(&self) -> &str {
        match self {
            Self::Premise { belief, .. }
            | Self::Supported { belief, .. }
            | Self::Unsupported { belief, .. }
            | Self::Circular { belief } => belief,
        }
    }

    /// True when the explained belief is supported by a premise or holding rule.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        match self {
            Self::Premise { valid, .. } => *valid == Some(true),
            Self::Supported { .. } => true,
            Self::Unsupported { .. } | Self::Circular { .. } => false,
        }
    }

    /// Premises reached at the leaves of a supported trace.
    #[must_use]
    pub fn leaf_premises(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_premises(&mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_premises(&self, out: &mut Vec<String>) {
        match self {
            Self::Premise { belief, .. } => out.push(belief.clone()),
            Self::Supported { premises, .. } => {
                for p in premises {
                    p.collect_premises(out);
                }
            }
            Self::Unsupported { .. } | Self::Circular { .. } => {}
        }
    }

    /// Indented, human-readable rendering.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        match self {
            Self::Premise { belief, valid } => {
                let _ = writeln!(out, "{pad}{belief}: premise ({})", fmt_validity(*valid));
            }
            Self::Supported {
                belief,
                justification,
                premises,
                absent_defeaters,
            } => {
                let _ = writeln!(out, "{pad}{belief}: valid via {justification}");
                if !absent_defeaters.is_empty() {
                    let _ = writeln!(out, "{pad}  unless: {} (not valid)", absent_defeaters.join(", "));
                }
                for p in premises {
                    p.render_into(out, depth + 1);
                }
            }
            Self::Unsupported {
                belief,
                valid,
                attempted,
                failing_in,
                blocking_out,
            } => {
                match attempted {
                    Some(j) => {
                        let _ = writeln!(out, "{pad}{belief}: {} (no holding justification; last tried {j})", fmt_validity(*valid));
                    }
                    None => {
                        let _ = writeln!(out, "{pad}{belief}: {} (no justification)", fmt_validity(*valid));
                    }
                }
                if !failing_in.is_empty() {
                    let _ = writeln!(out, "{pad}  missing: {}", failing_in.join(", "));
                }
                if !blocking_out.is_empty() {
                    let _ = writeln!(out, "{pad}  blocked by: {}", blocking_out.join(", "));
                }
            }
            Self::Circular { belief } => {
                let _ = writeln!(out, "{pad}{belief}: (circular support)");
            }
        }
    }
}

fn fmt_validity(valid: Option<bool>) -> &'static str {
    match valid {
        Some(true) => "valid",
        Some(false) => "invalid",
        None => "undetermined",
    }
}

impl BeliefGraph {
    pub(super) fn explain_inner(&self, name: &str, visiting: &mut BTreeSet<String>) -> Explanation {
        let Some(node) = self.nodes.get(name) else {
            return Explanation::Unsupported {
                belief: name.to_string(),
                valid: None,
                attempted: None,
                failing_in: Vec::new(),
                blocking_out: Vec::new(),
            };
        };

        if !visiting.insert(name.to_string()) {
            return Explanation::Circular {
                belief: name.to_string(),
            };
        }

        let explanation = if let Some(v) = node.asserted {
            Explanation::Premise {
                belief: name.to_string(),
                valid: Some(v),
            }
        } else if let Some(j) = node.justifications.iter().find(|j| self.holds(j)) {
            let premises = j
                .in_list
                .iter()
                .map(|p| self.explain_inner(p, visiting))
                .collect();
            Explanation::Supported {
                belief: name.to_string(),
                justification: j.clone(),
                premises,
                absent_defeaters: j.out_list.iter().cloned().collect(),
            }
        } else {
            let attempted = node.justifications.last().cloned();
            let (failing_in, blocking_out) = attempted
                .as_ref()
                .map(|j| {
                    let failing = j
                        .in_list
                        .iter()
                        .filter(|n| self.validity(n) != Some(true))
                        .cloned()
                        .collect();
                    let blocking = j
                        .out_list
                        .iter()
                        .filter(|n| self.validity(n) == Some(true))
                        .cloned()
                        .collect();
                    (failing, blocking)
                })
                .unwrap_or_default();
            Explanation::Unsupported {
                belief: name.to_string(),
                valid: node.valid,
                attempted,
                failing_in,
                blocking_out,
            }
        };

        visiting.remove(name);
        explanation
    }
}
