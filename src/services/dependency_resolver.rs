//! Dependency graphs over named nodes.
//!
//! Both the image parent graph and the service dependency graph are
//! expressed as `node -> dependencies` maps. Edges to nodes outside the map
//! are ignored here; the manifest validator reports them separately.

use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Adjacency list: node name to the names it depends on.
pub type DependencyGraph = BTreeMap<String, Vec<String>>;

/// Resolves ordering and cycles in dependency graphs
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util<'a>(
    node: &'a str,
    graph: &'a DependencyGraph,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(node) {
        for neighbor in neighbors {
            let neighbor = neighbor.as_str();
            if !graph.contains_key(neighbor) {
                continue;
            }
            if !visited.contains(neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(neighbor) {
                // Cycle detected: keep only the looping part and close it
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Detect a dependency cycle.
    ///
    /// Returns the cycle as a closed path (`a -> b -> a`). Nodes are visited
    /// in name order so the reported cycle is deterministic.
    pub fn detect_cycle(&self, graph: &DependencyGraph) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in graph.keys() {
            if !visited.contains(node.as_str())
                && detect_cycle_util(node, graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path.into_iter().map(str::to_string).collect());
            }
        }

        None
    }

    /// Group nodes into waves: every node's dependencies sit in earlier waves.
    ///
    /// Kahn's algorithm with name-sorted ready sets. Returns the cycle path as
    /// the error when the graph is not acyclic.
    pub fn topological_waves(&self, graph: &DependencyGraph) -> Result<Vec<Vec<String>>, Vec<String>> {
        if let Some(cycle) = self.detect_cycle(graph) {
            return Err(cycle);
        }

        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (node, deps) in graph {
            in_degree.entry(node.as_str()).or_insert(0);
            let deps: BTreeSet<&str> = deps
                .iter()
                .map(String::as_str)
                .filter(|d| graph.contains_key(*d))
                .collect();
            for dep in deps {
                dependents.entry(dep).or_default().push(node.as_str());
                *in_degree.entry(node.as_str()).or_insert(0) += 1;
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut waves = Vec::new();
        let mut placed = 0;

        while !ready.is_empty() {
            ready.sort_unstable();
            let mut next = Vec::new();

            for &node in &ready {
                for &dependent in dependents.get(node).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent);
                        }
                    }
                }
            }

            placed += ready.len();
            waves.push(ready.iter().map(|s| (*s).to_string()).collect());
            ready = next;
        }

        if placed != graph.len() {
            // Unreachable after the cycle check, kept as a guard.
            return Err(Vec::new());
        }

        Ok(waves)
    }

    /// Dependencies before dependents, ties broken by name.
    pub fn topological_sort(&self, graph: &DependencyGraph) -> Result<Vec<String>, Vec<String>> {
        Ok(self.topological_waves(graph)?.into_iter().flatten().collect())
    }

    /// Every node that transitively depends on `node`, in name order.
    pub fn transitive_dependents(&self, graph: &DependencyGraph, node: &str) -> Vec<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![node.to_string()];

        while let Some(current) = frontier.pop() {
            for (candidate, deps) in graph {
                if deps.iter().any(|d| *d == current) && found.insert(candidate.clone()) {
                    frontier.push(candidate.clone());
                }
            }
        }

        found.remove(node);
        found.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        edges
            .iter()
            .map(|(node, deps)| {
                (
                    (*node).to_string(),
                    deps.iter().map(|d| (*d).to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_detect_cycle_no_cycle() {
        let resolver = DependencyResolver::new();
        let g = graph(&[("a", &[]), ("b", &["a"])]);
        assert!(resolver.detect_cycle(&g).is_none());
    }

    #[test]
    fn test_detect_cycle_returns_closed_path() {
        let resolver = DependencyResolver::new();
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"]), ("d", &[])]);

        let cycle = resolver.detect_cycle(&g).unwrap();
        assert_eq!(cycle, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let resolver = DependencyResolver::new();
        let g = graph(&[("a", &["a"])]);
        assert_eq!(resolver.detect_cycle(&g).unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn test_topological_sort_simple() {
        let resolver = DependencyResolver::new();
        let g = graph(&[("c", &["b"]), ("a", &[]), ("b", &["a"])]);

        assert_eq!(resolver.topological_sort(&g).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_waves_group_independent_nodes() {
        let resolver = DependencyResolver::new();
        let g = graph(&[
            ("base", &[]),
            ("tools", &[]),
            ("app", &["base"]),
            ("worker", &["base", "tools"]),
        ]);

        let waves = resolver.topological_waves(&g).unwrap();
        assert_eq!(waves, vec![vec!["base", "tools"], vec!["app", "worker"]]);
    }

    #[test]
    fn test_topological_sort_with_cycle() {
        let resolver = DependencyResolver::new();
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        assert!(resolver.topological_sort(&g).is_err());
    }

    #[test]
    fn test_unknown_dependencies_are_ignored() {
        let resolver = DependencyResolver::new();
        let g = graph(&[("a", &["external"])]);
        assert_eq!(resolver.topological_sort(&g).unwrap(), vec!["a"]);
    }

    #[test]
    fn test_transitive_dependents() {
        let resolver = DependencyResolver::new();
        let g = graph(&[
            ("db", &[]),
            ("api", &["db"]),
            ("web", &["api"]),
            ("cache", &[]),
        ]);

        assert_eq!(resolver.transitive_dependents(&g, "db"), vec!["api", "web"]);
        assert!(resolver.transitive_dependents(&g, "cache").is_empty());
    }
}
