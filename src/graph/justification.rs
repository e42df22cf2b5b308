//! Justifications: `(in_list, out_list) -> conclusion` rules.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A support/attack rule for a belief.
///
/// The justification holds iff every member of `in_list` is valid and no
/// member of `out_list` is valid. Undetermined out-members do not block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Justification {
    /// Beliefs that must be valid.
    #[serde(rename = "in")]
    pub in_list: BTreeSet<String>,

    /// Beliefs that must not be valid.
    #[serde(rename = "out")]
    pub out_list: BTreeSet<String>,

    /// The belief this rule supports.
    pub conclusion: String,
}

impl Justification {
    /// Creates a justification from any iterables of names.
    pub fn new<I, O, S, T>(in_list: I, out_list: O, conclusion: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        O: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            in_list: in_list.into_iter().map(Into::into).collect(),
            out_list: out_list.into_iter().map(Into::into).collect(),
            conclusion: conclusion.into(),
        }
    }

    /// Every belief name mentioned by this rule, conclusion included.
    pub fn mentioned(&self) -> impl Iterator<Item = &String> {
        self.in_list
            .iter()
            .chain(self.out_list.iter())
            .chain(std::iter::once(&self.conclusion))
    }

    /// Antecedents (in and out) without the conclusion.
    pub fn antecedents(&self) -> impl Iterator<Item = &String> {
        self.in_list.iter().chain(self.out_list.iter())
    }

    /// Names appearing in both lists.
    #[must_use]
    pub fn overlap(&self) -> Vec<String> {
        self.in_list.intersection(&self.out_list).cloned().collect()
    }

    /// True when both lists carry the same members as `other` for the same conclusion.
    #[must_use]
    pub fn same_rule(&self, other: &Self) -> bool {
        self.conclusion == other.conclusion
            && self.in_list == other.in_list
            && self.out_list == other.out_list
    }

    /// True for a premise-free rule (both lists empty).
    #[must_use]
    pub fn is_unconditional(&self) -> bool {
        self.in_list.is_empty() && self.out_list.is_empty()
    }
}

impl fmt::Display for Justification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ins: Vec<&str> = self.in_list.iter().map(String::as_str).collect();
        let outs: Vec<&str> = self.out_list.iter().map(String::as_str).collect();
        write!(f, "({}) / not({}) -> {}", ins.join(", "), outs.join(", "), self.conclusion)
    }
}
