use std::collections::{BTreeMap, HashMap};

use keel::services::{DependencyGraph, DependencyResolver};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

/// Random DAG: node `i` may only depend on nodes with a smaller index.
fn acyclic_graph() -> impl Strategy<Value = DependencyGraph> {
    (1usize..24).prop_flat_map(|size| {
        proptest::collection::vec(proptest::collection::vec(any::<prop::sample::Index>(), 0..4), size).prop_map(
            move |edges| {
                edges
                    .into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        let deps = if i == 0 {
                            Vec::new()
                        } else {
                            picks.iter().map(|p| format!("n{:02}", p.index(i))).collect()
                        };
                        (format!("n{i:02}"), deps)
                    })
                    .collect::<BTreeMap<_, _>>()
            },
        )
    })
}

proptest! {
    /// Property: every dependency is placed before its dependents
    #[test]
    fn prop_order_respects_dependencies(graph in acyclic_graph()) {
        let resolver = DependencyResolver::new();
        let order = resolver
            .topological_sort(&graph)
            .map_err(|cycle| TestCaseError::fail(format!("unexpected cycle {cycle:?}")))?;

        prop_assert_eq!(order.len(), graph.len());
        let position: HashMap<&str, usize> = order.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        for (node, deps) in &graph {
            for dep in deps {
                prop_assert!(position[dep.as_str()] < position[node.as_str()], "{} placed before {}", node, dep);
            }
        }
    }

    /// Property: waves only hold nodes whose dependencies sit in earlier waves
    #[test]
    fn prop_waves_are_independent(graph in acyclic_graph()) {
        let resolver = DependencyResolver::new();
        let waves = resolver
            .topological_waves(&graph)
            .map_err(|cycle| TestCaseError::fail(format!("unexpected cycle {cycle:?}")))?;

        let wave_of: HashMap<&str, usize> = waves
            .iter()
            .enumerate()
            .flat_map(|(i, wave)| wave.iter().map(move |n| (n.as_str(), i)))
            .collect();
        for (node, deps) in &graph {
            for dep in deps {
                prop_assert!(wave_of[dep.as_str()] < wave_of[node.as_str()]);
            }
        }
    }

    /// Property: the order is a function of the graph alone
    #[test]
    fn prop_order_is_deterministic(graph in acyclic_graph()) {
        let resolver = DependencyResolver::new();
        prop_assert_eq!(resolver.topological_sort(&graph), resolver.topological_sort(&graph.clone()));
    }

    /// Property: closing any path back on itself is reported as a cycle
    #[test]
    fn prop_back_edge_is_a_cycle(graph in acyclic_graph(), pick in any::<prop::sample::Index>()) {
        prop_assume!(graph.len() > 1);
        let mut graph = graph;
        let last = format!("n{:02}", graph.len() - 1);
        let target = format!("n{:02}", pick.index(graph.len() - 1));
        // n00 -> ... chain guarantees reachability from `last` back to itself
        for i in 1..graph.len() {
            let node = format!("n{i:02}");
            let prev = format!("n{:02}", i - 1);
            graph.get_mut(&node).unwrap().push(prev);
        }
        graph.get_mut(&target).unwrap().push(last);

        let resolver = DependencyResolver::new();
        let cycle = resolver.detect_cycle(&graph);
        prop_assert!(cycle.is_some());
        let cycle = cycle.unwrap();
        prop_assert_eq!(cycle.first(), cycle.last());
        prop_assert!(resolver.topological_sort(&graph).is_err());
    }

    /// Property: dependents of a node never include the node's own dependencies
    #[test]
    fn prop_dependents_exclude_ancestors(graph in acyclic_graph(), pick in any::<prop::sample::Index>()) {
        let resolver = DependencyResolver::new();
        let node = format!("n{:02}", pick.index(graph.len()));
        let dependents = resolver.transitive_dependents(&graph, &node);

        prop_assert!(!dependents.contains(&node));
        for dep in &graph[&node] {
            prop_assert!(!dependents.contains(dep));
        }
    }
}
