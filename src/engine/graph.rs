//! Dependency graph for hybrid execution
//!
//! Tracks remaining-prerequisite and failed-prerequisite counts per tool,
//! emitting newly-ready tools and terminally-skipped tools as completions
//! arrive. Validated acyclic at build time; cycles are a configuration bug,
//! not a runtime condition.

use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),
    #[error("tool {tool} depends on unknown tool {dependency}")]
    UnknownDependency { tool: String, dependency: String },
    #[error("dependency cycle involving: {0}")]
    Cycle(String),
}

/// Effects of one completion event.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CompletionEffects {
    /// Tools whose prerequisites are now all satisfied.
    pub newly_ready: Vec<String>,
    /// Tools that will never run because a prerequisite failed or was
    /// itself skipped. Terminal; the scheduler must not feed these back.
    pub skipped: Vec<String>,
}

#[derive(Debug)]
pub struct DependencyGraph {
    /// Declaration order, for deterministic ready sets.
    order: Vec<String>,
    children: HashMap<String, Vec<String>>,
    remaining: HashMap<String, usize>,
    failed_deps: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Build and validate from `(name, prerequisites)` pairs.
    pub fn build(specs: &[(String, Vec<String>)]) -> Result<Self, GraphError> {
        let mut order = Vec::with_capacity(specs.len());
        let mut names = HashSet::with_capacity(specs.len());
        for (name, _) in specs {
            if !names.insert(name.as_str()) {
                return Err(GraphError::DuplicateTool(name.clone()));
            }
            order.push(name.clone());
        }

        let mut children: HashMap<String, Vec<String>> =
            order.iter().map(|n| (n.clone(), Vec::new())).collect();
        let mut remaining: HashMap<String, usize> =
            order.iter().map(|n| (n.clone(), 0)).collect();

        for (name, deps) in specs {
            for dep in deps {
                if !names.contains(dep.as_str()) {
                    return Err(GraphError::UnknownDependency {
                        tool: name.clone(),
                        dependency: dep.clone(),
                    });
                }
                children.get_mut(dep).unwrap().push(name.clone());
                *remaining.get_mut(name).unwrap() += 1;
            }
        }

        let graph = Self {
            failed_deps: order.iter().map(|n| (n.clone(), 0)).collect(),
            order,
            children,
            remaining,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Kahn's algorithm over a scratch copy of the in-degree counts.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut degree = self.remaining.clone();
        let mut queue: VecDeque<&String> = self
            .order
            .iter()
            .filter(|n| degree[n.as_str()] == 0)
            .collect();

        let mut reached = 0usize;
        while let Some(name) = queue.pop_front() {
            reached += 1;
            for child in &self.children[name] {
                let d = degree.get_mut(child).unwrap();
                *d -= 1;
                if *d == 0 {
                    queue.push_back(child);
                }
            }
        }

        if reached < self.order.len() {
            let stuck: Vec<&str> = self
                .order
                .iter()
                .filter(|n| degree[n.as_str()] > 0)
                .map(String::as_str)
                .collect();
            return Err(GraphError::Cycle(stuck.join(", ")));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[allow(dead_code)] // API completeness
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tools runnable immediately, in declaration order.
    pub fn initial_ready(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|n| self.remaining[n.as_str()] == 0 && self.failed_deps[n.as_str()] == 0)
            .cloned()
            .collect()
    }

    /// Record a terminal outcome for `name` and propagate. Skips cascade
    /// breadth-first: a skipped tool counts as a failed prerequisite for its
    /// own children, until fixed point.
    pub fn on_complete(&mut self, name: &str, success: bool) -> CompletionEffects {
        let mut effects = CompletionEffects::default();
        let mut queue = VecDeque::from([(name.to_string(), success)]);

        while let Some((done, ok)) = queue.pop_front() {
            let children = self.children.get(&done).cloned().unwrap_or_default();
            for child in children {
                let Some(rem) = self.remaining.get_mut(&child) else {
                    continue;
                };
                *rem = rem.saturating_sub(1);
                if !ok {
                    *self.failed_deps.get_mut(&child).unwrap() += 1;
                }

                if self.remaining[&child] == 0 {
                    if self.failed_deps[&child] == 0 {
                        effects.newly_ready.push(child);
                    } else {
                        effects.skipped.push(child.clone());
                        queue.push_back((child, false));
                    }
                }
            }
        }

        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(pairs: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        pairs
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    fn diamond() -> DependencyGraph {
        DependencyGraph::build(&specs(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
        ]))
        .unwrap()
    }

    #[test]
    fn diamond_ready_progression() {
        let mut graph = diamond();
        assert_eq!(graph.initial_ready(), vec!["a"]);

        let effects = graph.on_complete("a", true);
        assert_eq!(effects.newly_ready, vec!["b", "c"]);
        assert!(effects.skipped.is_empty());

        assert!(graph.on_complete("b", true).newly_ready.is_empty());
        let effects = graph.on_complete("c", true);
        assert_eq!(effects.newly_ready, vec!["d"]);
    }

    #[test]
    fn failure_skips_transitive_dependents() {
        let mut graph = diamond();
        graph.on_complete("a", true);

        // b fails: d is not yet decided (c still pending)...
        let effects = graph.on_complete("b", false);
        assert!(effects.newly_ready.is_empty());
        assert!(effects.skipped.is_empty());

        // ...until c finishes, at which point d is terminally skipped.
        let effects = graph.on_complete("c", true);
        assert!(effects.newly_ready.is_empty());
        assert_eq!(effects.skipped, vec!["d"]);
    }

    #[test]
    fn skips_cascade_to_fixed_point() {
        let mut graph = DependencyGraph::build(&specs(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["b"]),
            ("d", &["c"]),
        ]))
        .unwrap();

        let effects = graph.on_complete("a", false);
        assert_eq!(effects.skipped, vec!["b", "c", "d"]);
        assert!(effects.newly_ready.is_empty());
    }

    #[test]
    fn rejects_cycle() {
        let err = DependencyGraph::build(&specs(&[
            ("a", &["c"]),
            ("b", &["a"]),
            ("c", &["b"]),
        ]))
        .unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn rejects_self_cycle() {
        let err = DependencyGraph::build(&specs(&[("a", &["a"])])).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn rejects_duplicates_and_unknown_deps() {
        assert!(matches!(
            DependencyGraph::build(&specs(&[("a", &[]), ("a", &[])])).unwrap_err(),
            GraphError::DuplicateTool(_)
        ));
        assert!(matches!(
            DependencyGraph::build(&specs(&[("a", &["ghost"])])).unwrap_err(),
            GraphError::UnknownDependency { .. }
        ));
    }
}
