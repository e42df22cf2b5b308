//! Propagation waves.
//!
//! A wave covers every belief reachable from the changed belief along
//! implication edges. The acyclic part of the wave is evaluated in topological
//! order, each belief exactly once. Beliefs left over sit on (or downstream of)
//! support cycles: they are reset to "unsupported" and iterated to a fixed point
//! with a bounded number of rounds, so propagation always terminates.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::BeliefGraph;

/// Summary of one propagation wave.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationWave {
    /// Beliefs whose validity differs from before the wave.
    pub changed: Vec<String>,
    /// Number of single-belief evaluations performed.
    pub evaluated: usize,
    /// Beliefs newly flagged as non-monotonic by this wave.
    pub flagged_non_monotonic: Vec<String>,
    /// Beliefs that kept oscillating and were left undetermined.
    pub unsettled: Vec<String>,
}

impl PropagationWave {
    /// True when the wave did no work.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evaluated == 0 && self.changed.is_empty()
    }
}

impl BeliefGraph {
    /// Re-establishes validity for `start` and everything that depends on it.
    pub(super) fn propagate_from(&mut self, start: &str) -> PropagationWave {
        let mut wave = PropagationWave::default();
        if !self.nodes.contains_key(start) {
            return wave;
        }
        self.waves += 1;

        let affected = self.reachable_from(start);
        let before: BTreeMap<String, Option<bool>> = affected
            .iter()
            .map(|n| (n.clone(), self.nodes.get(n).and_then(|node| node.valid)))
            .collect();

        // In-degree restricted to the wave.
        let mut indegree: BTreeMap<&str, usize> = affected.iter().map(|n| (n.as_str(), 0)).collect();
        for name in &affected {
            for dep in &self.nodes[name].implications {
                if let Some(d) = indegree.get_mut(dep.as_str()) {
                    *d += 1;
                }
            }
        }

        let mut ready: VecDeque<String> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| (*n).to_string())
            .collect();
        let mut indegree: BTreeMap<String, usize> =
            indegree.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let mut processed: BTreeSet<String> = BTreeSet::new();

        while let Some(name) = ready.pop_front() {
            let value = self.evaluate(&name);
            wave.evaluated += 1;
            if let Some(node) = self.nodes.get_mut(&name) {
                node.valid = value;
            }
            let deps: Vec<String> = self.nodes[&name].implications.iter().cloned().collect();
            for dep in deps {
                if let Some(d) = indegree.get_mut(&dep) {
                    *d = d.saturating_sub(1);
                    if *d == 0 && !processed.contains(&dep) {
                        ready.push_back(dep);
                    }
                }
            }
            processed.insert(name);
        }

        let residual: BTreeSet<String> = affected.difference(&processed).cloned().collect();
        if !residual.is_empty() {
            self.settle_cycles(&residual, &mut wave);
        }

        for (name, old) in before {
            if self.nodes.get(&name).and_then(|n| n.valid) != old {
                wave.changed.push(name);
            }
        }

        self.evaluations += wave.evaluated as u64;
        debug!(
            start,
            affected = affected.len(),
            changed = wave.changed.len(),
            evaluated = wave.evaluated,
            "propagation wave complete"
        );
        wave
    }

    fn reachable_from(&self, start: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        seen.insert(start.to_string());
        queue.push_back(start.to_string());
        while let Some(name) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&name) {
                for dep in &node.implications {
                    if seen.insert(dep.clone()) {
                        queue.push_back(dep.clone());
                    }
                }
            }
        }
        seen
    }

    fn settle_cycles(&mut self, residual: &BTreeSet<String>, wave: &mut PropagationWave) {
        for name in cycle_core(self, residual) {
            if let Some(node) = self.nodes.get_mut(&name) {
                if !node.non_monotonic {
                    node.non_monotonic = true;
                    wave.flagged_non_monotonic.push(name.clone());
                }
            }
        }

        // Least-support starting point: nothing on a cycle supports itself.
        for name in residual {
            if let Some(node) = self.nodes.get_mut(name) {
                if node.asserted.is_none() {
                    node.valid = if node.justifications.is_empty() { None } else { Some(false) };
                }
            }
        }

        let max_rounds = residual.len() + 1;
        let mut last_changed: Vec<String> = Vec::new();
        let mut settled = false;
        for _ in 0..max_rounds {
            last_changed.clear();
            for name in residual {
                let value = self.evaluate(name);
                wave.evaluated += 1;
                if let Some(node) = self.nodes.get_mut(name) {
                    if node.valid != value {
                        node.valid = value;
                        last_changed.push(name.clone());
                    }
                }
            }
            if last_changed.is_empty() {
                settled = true;
                break;
            }
        }

        if !settled {
            warn!(beliefs = ?last_changed, "support cycle did not settle; leaving beliefs undetermined");
            for name in last_changed {
                if let Some(node) = self.nodes.get_mut(&name) {
                    node.valid = None;
                    if !node.non_monotonic {
                        node.non_monotonic = true;
                        wave.flagged_non_monotonic.push(name.clone());
                    }
                }
                wave.unsettled.push(name);
            }
        }
    }
}

/// Members of `residual` that both receive from and feed into other residual
/// members after peeling off pure sources and sinks: the cycles themselves.
fn cycle_core(graph: &BeliefGraph, residual: &BTreeSet<String>) -> BTreeSet<String> {
    let mut core = residual.clone();
    loop {
        let mut removed = Vec::new();
        for name in &core {
            let has_out = graph.nodes[name]
                .implications
                .iter()
                .any(|d| core.contains(d));
            let has_in = core.iter().any(|other| graph.nodes[other].implications.contains(name));
            if !has_out || !has_in {
                removed.push(name.clone());
            }
        }
        if removed.is_empty() {
            break;
        }
        for name in removed {
            core.remove(&name);
        }
    }
    core
}

#[cfg(test)]
mod tests {
    use crate::graph::{BeliefGraph, Justification};

    fn j(ins: &[&str], outs: &[&str], c: &str) -> Justification {
        Justification::new(ins.iter().copied(), outs.iter().copied(), c)
    }

    #[test]
    fn test_diamond_is_not_flagged() {
        let mut g = BeliefGraph::new();
        g.add_justification(j(&["a"], &[], "b")).unwrap();
        g.add_justification(j(&["a"], &[], "c")).unwrap();
        g.add_justification(j(&["b", "c"], &[], "d")).unwrap();
        let wave = g.set_validity("a", Some(true)).unwrap();
        assert_eq!(g.is_valid("d").unwrap(), Some(true));
        assert!(wave.flagged_non_monotonic.is_empty());
        assert!(g.non_monotonic_beliefs().is_empty());
        // Each belief in the wave evaluated once.
        assert_eq!(wave.evaluated, 4);
    }

    #[test]
    fn test_positive_cycle_needs_external_support() {
        let mut g = BeliefGraph::new();
        g.add_justification(j(&["a"], &[], "b")).unwrap();
        g.add_justification(j(&["b"], &[], "a")).unwrap();
        assert_eq!(g.is_valid("a").unwrap(), Some(false));
        assert_eq!(g.is_valid("b").unwrap(), Some(false));
        let mut flagged = g.non_monotonic_beliefs();
        flagged.sort();
        assert_eq!(flagged, vec!["a".to_string(), "b".to_string()]);

        g.add_justification(j(&["root"], &[], "a")).unwrap();
        g.set_validity("root", Some(true)).unwrap();
        assert_eq!(g.is_valid("a").unwrap(), Some(true));
        assert_eq!(g.is_valid("b").unwrap(), Some(true));

        g.set_validity("root", Some(false)).unwrap();
        assert_eq!(g.is_valid("a").unwrap(), Some(false));
        assert_eq!(g.is_valid("b").unwrap(), Some(false));
    }

    #[test]
    fn test_odd_loop_terminates_undetermined() {
        let mut g = BeliefGraph::new();
        // p holds only if p does not: no stable value exists.
        let wave = g.add_justification(j(&[], &["p"], "p")).unwrap();
        assert_eq!(g.is_valid("p").unwrap(), None);
        assert_eq!(wave.unsettled, vec!["p".to_string()]);
        assert!(g.belief("p").unwrap().is_non_monotonic());
    }

    #[test]
    fn test_downstream_of_cycle_not_flagged() {
        let mut g = BeliefGraph::new();
        g.add_justification(j(&["a"], &[], "b")).unwrap();
        g.add_justification(j(&["b"], &[], "a")).unwrap();
        g.add_justification(j(&["b"], &[], "tail")).unwrap();
        g.add_justification(j(&["seed"], &[], "a")).unwrap();
        g.set_validity("seed", Some(true)).unwrap();
        assert_eq!(g.is_valid("tail").unwrap(), Some(true));
        assert!(!g.belief("tail").unwrap().is_non_monotonic());
    }

    #[test]
    fn test_wave_reports_changes() {
        let mut g = BeliefGraph::new();
        g.add_justification(j(&["a"], &[], "b")).unwrap();
        let wave = g.set_validity("a", Some(true)).unwrap();
        assert!(wave.changed.contains(&"a".to_string()));
        assert!(wave.changed.contains(&"b".to_string()));

        let wave = g.set_validity("a", Some(true)).unwrap();
        assert!(wave.changed.is_empty());
    }
}
