//! Property tests: incremental propagation agrees with a from-scratch
//! evaluation on acyclic graphs, and always terminates on cyclic ones.

use proptest::prelude::*;

use kyrotms::{BeliefGraph, Justification};

const MAX_NODES: usize = 12;

fn name(i: usize) -> String {
    format!("b{i}")
}

/// A rule whose antecedents all have a lower index than its conclusion.
#[derive(Debug, Clone)]
struct Rule {
    conclusion: usize,
    ins: Vec<usize>,
    outs: Vec<usize>,
}

impl Rule {
    fn justification(&self) -> Justification {
        Justification::new(
            self.ins.iter().map(|i| name(*i)),
            self.outs.iter().map(|i| name(*i)),
            name(self.conclusion),
        )
    }
}

#[derive(Debug, Clone)]
enum Step {
    AddRule(Rule),
    Assert(usize, Option<bool>),
}

fn acyclic_rule(nodes: usize) -> impl Strategy<Value = Rule> {
    (1..nodes).prop_flat_map(|conclusion| {
        (
            Just(conclusion),
            prop::collection::vec(0..conclusion, 0..3),
            prop::collection::vec(0..conclusion, 0..2),
        )
            .prop_map(|(conclusion, ins, outs)| Rule { conclusion, ins, outs })
    })
}

fn any_rule(nodes: usize) -> impl Strategy<Value = Rule> {
    (
        0..nodes,
        prop::collection::vec(0..nodes, 0..3),
        prop::collection::vec(0..nodes, 0..2),
    )
        .prop_map(|(conclusion, ins, outs)| Rule { conclusion, ins, outs })
        .prop_filter("self-defeating", |r| !(r.ins.contains(&r.conclusion) && r.outs.contains(&r.conclusion)))
}

fn premise_value() -> impl Strategy<Value = Option<bool>> {
    prop_oneof![Just(None), Just(Some(true)), Just(Some(false))]
}

fn steps(rule: BoxedStrategy<Rule>, nodes: usize) -> impl Strategy<Value = Vec<Step>> {
    let step = prop_oneof![
        3 => rule.prop_map(Step::AddRule),
        2 => (0..nodes, premise_value()).prop_map(|(i, v)| Step::Assert(i, v)),
    ];
    prop::collection::vec(step, 1..40)
}

fn build(nodes: usize, steps: &[Step]) -> BeliefGraph {
    let mut graph = BeliefGraph::new();
    for i in 0..nodes {
        graph.add_belief(&name(i)).unwrap();
    }
    for step in steps {
        match step {
            Step::AddRule(rule) => {
                graph.add_justification(rule.justification()).unwrap();
            }
            Step::Assert(i, v) => {
                graph.set_validity(&name(*i), *v).unwrap();
            }
        }
    }
    graph
}

/// Evaluates every belief in index order, which is topological for
/// acyclic rules.
fn naive(nodes: usize, steps: &[Step]) -> Vec<Option<bool>> {
    let mut asserted = vec![None; nodes];
    let mut rules: Vec<Vec<(Vec<usize>, Vec<usize>)>> = vec![Vec::new(); nodes];
    for step in steps {
        match step {
            Step::AddRule(r) => {
                let mut ins = r.ins.clone();
                ins.sort_unstable();
                ins.dedup();
                let mut outs = r.outs.clone();
                outs.sort_unstable();
                outs.dedup();
                if !rules[r.conclusion].contains(&(ins.clone(), outs.clone())) {
                    rules[r.conclusion].push((ins, outs));
                }
            }
            Step::Assert(i, v) => asserted[*i] = *v,
        }
    }

    let mut valid: Vec<Option<bool>> = vec![None; nodes];
    for i in 0..nodes {
        valid[i] = if let Some(v) = asserted[i] {
            Some(v)
        } else if rules[i].is_empty() {
            None
        } else {
            Some(rules[i].iter().any(|(ins, outs)| {
                ins.iter().all(|a| valid[*a] == Some(true)) && !outs.iter().any(|o| valid[*o] == Some(true))
            }))
        };
    }
    valid
}

fn scenario(rule: fn(usize) -> BoxedStrategy<Rule>) -> impl Strategy<Value = (usize, Vec<Step>)> {
    (2..=MAX_NODES).prop_flat_map(move |nodes| (Just(nodes), steps(rule(nodes), nodes)))
}

proptest! {
    #[test]
    fn prop_incremental_matches_naive_on_acyclic_graphs(
        (nodes, steps) in scenario(|n| acyclic_rule(n).boxed())
    ) {
        let graph = build(nodes, &steps);
        let expected = naive(nodes, &steps);
        for (i, want) in expected.iter().enumerate() {
            prop_assert_eq!(graph.is_valid(&name(i)).unwrap(), *want, "belief {}", name(i));
        }
        prop_assert!(graph.non_monotonic_beliefs().is_empty());
    }

    #[test]
    fn prop_propagation_terminates_and_respects_premises(
        (nodes, steps) in scenario(|n| any_rule(n).boxed())
    ) {
        let graph = build(nodes, &steps);
        for node in graph.beliefs() {
            if let Some(v) = node.asserted() {
                prop_assert_eq!(node.valid(), Some(v));
            }
            if node.justifications().is_empty() && node.asserted().is_none() {
                prop_assert_eq!(node.valid(), None);
            }
        }
    }

    #[test]
    fn prop_rule_order_does_not_matter_on_acyclic_graphs(
        (nodes, steps) in scenario(|n| acyclic_rule(n).boxed())
    ) {
        let forward = build(nodes, &steps);
        let mut reversed_rules: Vec<Step> = steps.iter().filter(|s| matches!(s, Step::AddRule(_))).cloned().collect();
        reversed_rules.reverse();
        // Premise assertions keep their relative order so the last write wins in both runs.
        reversed_rules.extend(steps.iter().filter(|s| matches!(s, Step::Assert(..))).cloned());
        let backward = build(nodes, &reversed_rules);
        for i in 0..nodes {
            prop_assert_eq!(forward.is_valid(&name(i)).unwrap(), backward.is_valid(&name(i)).unwrap());
        }
    }
}
