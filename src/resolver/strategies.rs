use std::collections::BTreeSet;

use super::{BeliefEvidence, ExpertiseMap};

/// Selection made by a strategy over the candidate list.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Selection {
    /// Index into the candidate slice.
    Winner { index: usize, reasoning: String },
    Undecided(String),
}

/// Picks the unique maximum of `score`; a shared maximum is undecided.
fn unique_max<F>(candidates: &[BeliefEvidence], score: F) -> Option<usize>
where
    F: Fn(&BeliefEvidence) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    let mut tied = false;
    for (i, c) in candidates.iter().enumerate() {
        let s = score(c);
        match best {
            None => best = Some((i, s)),
            Some((_, b)) if s > b => {
                best = Some((i, s));
                tied = false;
            }
            Some((_, b)) if (s - b).abs() < f64::EPSILON => tied = true,
            Some(_) => {}
        }
    }
    match best {
        Some((i, _)) if !tied => Some(i),
        _ => None,
    }
}

pub(super) fn confidence_based(candidates: &[BeliefEvidence]) -> Selection {
    match unique_max(candidates, |c| f64::from(c.confidence)) {
        Some(i) => Selection::Winner {
            index: i,
            reasoning: format!(
                "highest confidence: {}@{} with {:.2}",
                candidates[i].belief, candidates[i].agent, candidates[i].confidence
            ),
        },
        None => Selection::Undecided("confidence tie".to_string()),
    }
}

pub(super) fn evidence_based(candidates: &[BeliefEvidence]) -> Selection {
    match unique_max(candidates, BeliefEvidence::evidence_score) {
        Some(i) => Selection::Winner {
            index: i,
            reasoning: format!(
                "strongest evidence: {}@{} with {} justification(s) at {:.2}",
                candidates[i].belief,
                candidates[i].agent,
                candidates[i].justification_count,
                candidates[i].confidence
            ),
        },
        None => Selection::Undecided("evidence tie".to_string()),
    }
}

pub(super) fn temporal(candidates: &[BeliefEvidence]) -> Selection {
    let dated = candidates.iter().all(|c| c.created_at.is_some());
    if !dated {
        return Selection::Undecided("creation time unknown for some party".to_string());
    }
    let score = |c: &BeliefEvidence| c.created_at.map_or(f64::MIN, |t| t.timestamp_micros() as f64);
    match unique_max(candidates, score) {
        Some(i) => Selection::Winner {
            index: i,
            reasoning: format!("most recent: {}@{}", candidates[i].belief, candidates[i].agent),
        },
        None => Selection::Undecided("created at the same instant".to_string()),
    }
}

pub(super) fn agent_expertise(
    candidates: &[BeliefEvidence],
    context_type: Option<&str>,
    expertise: &ExpertiseMap,
) -> Selection {
    let Some(context_type) = context_type else {
        return Selection::Undecided("no context type recorded".to_string());
    };
    let Some(role) = expertise.preferred_role(context_type) else {
        return Selection::Undecided(format!("no preferred role for context '{context_type}'"));
    };
    let experts: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.role.as_deref() == Some(role))
        .map(|(i, _)| i)
        .collect();
    match experts.as_slice() {
        [] => Selection::Undecided(format!("no '{role}' agent holds a competing belief")),
        [only] => Selection::Winner {
            index: *only,
            reasoning: format!("'{role}' agent {} is the expert for '{context_type}'", candidates[*only].agent),
        },
        many => {
            let subset: Vec<BeliefEvidence> = many.iter().map(|i| candidates[*i].clone()).collect();
            match unique_max(&subset, |c| f64::from(c.confidence)) {
                Some(j) => Selection::Winner {
                    index: many[j],
                    reasoning: format!(
                        "several '{role}' agents; {} has the highest confidence",
                        candidates[many[j]].agent
                    ),
                },
                None => Selection::Undecided(format!("several '{role}' agents with equal confidence")),
            }
        }
    }
}

/// Votes among every known holder of the conflicting beliefs.
///
/// A party's support is the number of holders that agree with it. Needs at
/// least three distinct agents.
pub(super) fn consensus(candidates: &[BeliefEvidence], holders: &[BeliefEvidence]) -> Selection {
    let agents: BTreeSet<&str> = candidates
        .iter()
        .chain(holders.iter())
        .map(|c| c.agent.as_str())
        .collect();
    if agents.len() < 3 {
        return Selection::Undecided(format!("consensus needs at least 3 agents, found {}", agents.len()));
    }

    let support = |c: &BeliefEvidence| {
        let voters: BTreeSet<&str> = holders
            .iter()
            .filter(|h| h.belief == c.belief && h.valid.is_some() && h.valid == c.valid)
            .map(|h| h.agent.as_str())
            .chain(std::iter::once(c.agent.as_str()))
            .collect();
        voters.len()
    };
    let votes: Vec<usize> = candidates.iter().map(support).collect();
    let total: usize = agents.len();

    match unique_max(candidates, |c| support(c) as f64) {
        Some(i) if votes[i] * 2 > total => Selection::Winner {
            index: i,
            reasoning: format!(
                "majority: {} of {} agents agree with {}@{}",
                votes[i], total, candidates[i].belief, candidates[i].agent
            ),
        },
        Some(i) => Selection::Undecided(format!("no strict majority ({} of {})", votes[i], total)),
        None => Selection::Undecided("votes are split evenly".to_string()),
    }
}
