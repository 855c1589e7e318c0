// src/resolver/graph.rs

//! Dependency graph over manifest components
//!
//! Topological order is a partial order; within a level the graph provides a
//! total order by component name, so two runs over the same manifest always
//! produce the same schedule.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::manifest::Manifest;

/// Dependency graph for ordering and closure queries
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// component -> its direct dependencies
    edges: BTreeMap<String, BTreeSet<String>>,
    /// component -> components depending on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from a validated manifest
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut graph = Self::new();
        for component in manifest.components.values() {
            graph.add_component(&component.name, component.depends_on.iter().map(String::as_str));
        }
        graph
    }

    pub fn add_component<'a>(&mut self, name: &str, deps: impl IntoIterator<Item = &'a str>) {
        let deps: BTreeSet<String> = deps.into_iter().map(str::to_string).collect();
        for dep in &deps {
            // A dependency named before (or without) its own declaration
            // still participates as a node
            self.edges.entry(dep.clone()).or_default();
            self.reverse_edges
                .entry(dep.clone())
                .or_default()
                .insert(name.to_string());
        }
        self.edges.entry(name.to_string()).or_default().extend(deps);
        self.reverse_edges.entry(name.to_string()).or_default();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Direct dependencies of a component
    pub fn dependencies(&self, name: &str) -> BTreeSet<String> {
        self.edges.get(name).cloned().unwrap_or_default()
    }

    /// Components that directly depend on `name`
    pub fn reverse_deps(&self, name: &str) -> BTreeSet<String> {
        self.reverse_edges.get(name).cloned().unwrap_or_default()
    }

    /// All components reachable through `depends_on` from `name`
    pub fn transitive_closure(&self, name: &str) -> BTreeSet<String> {
        let mut closure = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(name);

        while let Some(current) = queue.pop_front() {
            if let Some(deps) = self.edges.get(current) {
                for dep in deps {
                    if closure.insert(dep.clone()) {
                        queue.push_back(dep);
                    }
                }
            }
        }
        closure
    }

    /// All components that would break, directly or transitively, if `name`
    /// were removed
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut dependents = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(name);

        while let Some(current) = queue.pop_front() {
            if let Some(rdeps) = self.reverse_edges.get(current) {
                for rdep in rdeps {
                    if dependents.insert(rdep.clone()) {
                        queue.push_back(rdep);
                    }
                }
            }
        }
        dependents
    }

    /// Dependency-first order, alphabetical within a level.
    ///
    /// Kahn's algorithm processed level by level: every component whose
    /// dependencies are already placed joins the next level, and levels are
    /// emitted in sorted order.
    pub fn topo_order(&self) -> Result<Vec<String>> {
        Ok(self.topo_levels()?.into_iter().flatten().collect())
    }

    /// The same order, grouped by scheduling level
    pub fn topo_levels(&self) -> Result<Vec<Vec<String>>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();
        let mut levels = Vec::new();
        let mut placed = 0usize;

        while placed < self.edges.len() {
            // BTreeMap iteration makes each level come out sorted
            let level: Vec<String> = remaining
                .iter()
                .filter(|(_, degree)| **degree == 0)
                .map(|(name, _)| name.to_string())
                .collect();

            if level.is_empty() {
                return Err(Error::Cycle { members: self.find_cycle() });
            }

            for name in &level {
                remaining.remove(name.as_str());
                if let Some(rdeps) = self.reverse_edges.get(name) {
                    for rdep in rdeps {
                        if let Some(degree) = remaining.get_mut(rdep.as_str()) {
                            *degree -= 1;
                        }
                    }
                }
            }

            placed += level.len();
            levels.push(level);
        }

        Ok(levels)
    }

    /// Locate one cycle for diagnostics; the first and last member coincide
    fn find_cycle(&self) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        let mut on_stack = HashSet::new();

        for start in self.edges.keys() {
            if !visited.contains(start.as_str()) {
                if let Some(cycle) =
                    self.dfs_cycle(start, &mut visited, &mut stack, &mut on_stack)
                {
                    return cycle;
                }
            }
        }
        Vec::new()
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        stack.push(node);
        on_stack.insert(node);

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if on_stack.contains(dep.as_str()) {
                    let from = stack.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[from..].iter().map(|s| s.to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                if !visited.contains(dep.as_str()) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, stack, on_stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        on_stack.remove(node);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (name, deps) in edges {
            graph.add_component(name, deps.iter().copied());
        }
        graph
    }

    #[test]
    fn test_topo_order_chain() {
        let graph = graph(&[("app", &["lib"]), ("lib", &["base"]), ("base", &[])]);
        assert_eq!(graph.topo_order().unwrap(), vec!["base", "lib", "app"]);
    }

    #[test]
    fn test_topo_order_alphabetical_within_level() {
        let graph = graph(&[
            ("zeta", &[]),
            ("alpha", &[]),
            ("mid", &["alpha", "zeta"]),
        ]);
        assert_eq!(graph.topo_order().unwrap(), vec!["alpha", "zeta", "mid"]);
    }

    #[test]
    fn test_topo_levels_diamond() {
        let graph = graph(&[
            ("top", &["left", "right"]),
            ("left", &["base"]),
            ("right", &["base"]),
            ("base", &[]),
        ]);
        let levels = graph.topo_levels().unwrap();
        assert_eq!(levels[0], vec!["base"]);
        assert_eq!(levels[1], vec!["left", "right"]);
        assert_eq!(levels[2], vec!["top"]);
    }

    #[test]
    fn test_cycle_detection() {
        let graph = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let err = graph.topo_order().unwrap_err();
        match err {
            Error::Cycle { members } => {
                assert!(members.len() >= 3);
                assert_eq!(members.first(), members.last());
            }
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_reverse_deps_and_closures() {
        let graph = graph(&[
            ("app", &["lib"]),
            ("cli", &["lib"]),
            ("lib", &["base"]),
            ("base", &[]),
        ]);

        assert_eq!(
            graph.reverse_deps("lib"),
            ["app", "cli"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(
            graph.transitive_closure("app"),
            ["lib", "base"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(
            graph.transitive_dependents("base"),
            ["lib", "app", "cli"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::new();
        assert!(graph.topo_order().unwrap().is_empty());
    }

    #[test]
    fn test_order_is_stable_across_runs() {
        let graph = graph(&[
            ("d", &[]),
            ("c", &[]),
            ("b", &["c", "d"]),
            ("a", &["c"]),
        ]);
        let first = graph.topo_order().unwrap();
        for _ in 0..10 {
            assert_eq!(graph.topo_order().unwrap(), first);
        }
    }
}
