// src/core/variables/graph.rs

//! Dependency graph between resolution keys.
//!
//! Every time the value of one key requests another key, an edge is recorded.
//! An edge that would close a loop is refused and the loop is returned, which
//! catches cycles that span concurrently running resolutions and therefore
//! never appear on a single resolution stack.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

#[derive(Debug)]
pub struct DependencyGraph<K> {
    edges: Mutex<HashMap<K, BTreeSet<K>>>,
}

impl<K> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self {
            edges: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Clone + Eq + Hash + Ord> DependencyGraph<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `dependent` needs `dependency`.
    ///
    /// Returns the closed loop, starting and ending at `dependent`, when the
    /// edge would create a cycle.
    pub fn add_edge(&self, dependent: &K, dependency: &K) -> Result<(), Vec<K>> {
        let mut edges = self.edges.lock().unwrap_or_else(PoisonError::into_inner);

        if dependent == dependency {
            return Err(vec![dependent.clone(), dependency.clone()]);
        }
        if let Some(path) = find_path(&edges, dependency, dependent) {
            let mut cycle = Vec::with_capacity(path.len() + 1);
            cycle.push(dependent.clone());
            cycle.extend(path);
            return Err(cycle);
        }

        edges
            .entry(dependent.clone())
            .or_default()
            .insert(dependency.clone());
        Ok(())
    }

    pub fn dependencies_of(&self, key: &K) -> Vec<K> {
        let edges = self.edges.lock().unwrap_or_else(PoisonError::into_inner);
        edges
            .get(key)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Depth-first search for a path `from ..= to`.
fn find_path<K: Clone + Eq + Hash + Ord>(edges: &HashMap<K, BTreeSet<K>>, from: &K, to: &K) -> Option<Vec<K>> {
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    if walk(edges, from, to, &mut visited, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn walk<'a, K: Clone + Eq + Hash + Ord>(
    edges: &'a HashMap<K, BTreeSet<K>>,
    current: &'a K,
    target: &K,
    visited: &mut HashSet<&'a K>,
    path: &mut Vec<K>,
) -> bool {
    path.push(current.clone());
    if current == target {
        return true;
    }
    if visited.insert(current) {
        if let Some(next) = edges.get(current) {
            for dependency in next {
                if walk(edges, dependency, target, visited, path) {
                    return true;
                }
            }
        }
    }
    path.pop();
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_two_node_cycle() {
        let graph = DependencyGraph::<&str>::new();
        graph.add_edge(&"self:a", &"self:b").unwrap();
        let cycle = graph.add_edge(&"self:b", &"self:a").unwrap_err();
        assert_eq!(cycle, vec!["self:b", "self:a", "self:b"]);
    }

    #[test]
    fn detects_self_loop_and_long_cycles() {
        let graph = DependencyGraph::<&str>::new();
        assert_eq!(graph.add_edge(&"x", &"x").unwrap_err(), vec!["x", "x"]);

        graph.add_edge(&"a", &"b").unwrap();
        graph.add_edge(&"b", &"c").unwrap();
        let cycle = graph.add_edge(&"c", &"a").unwrap_err();
        assert_eq!(cycle, vec!["c", "a", "b", "c"]);
    }

    #[test]
    fn diamonds_are_not_cycles() {
        let graph = DependencyGraph::<&str>::new();
        graph.add_edge(&"top", &"left").unwrap();
        graph.add_edge(&"top", &"right").unwrap();
        graph.add_edge(&"left", &"bottom").unwrap();
        graph.add_edge(&"right", &"bottom").unwrap();
        assert_eq!(graph.dependencies_of(&"top"), vec!["left", "right"]);
    }
}
