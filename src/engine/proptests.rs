//! Property-based tests for pure engine logic
//!
//! These tests verify key invariants hold across all possible inputs.

use super::graph::DependencyGraph;
use super::runner::sanitize_for_filename;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};

const FORBIDDEN: &str = "<>:\"/\\|?*=&#";

proptest! {
    #[test]
    fn sanitize_is_idempotent(value in ".{0,200}") {
        let once = sanitize_for_filename(&value);
        let twice = sanitize_for_filename(&once);
        prop_assert_eq!(&twice, &once);
    }

    #[test]
    fn sanitize_never_emits_forbidden_characters(value in ".{0,200}") {
        let sanitized = sanitize_for_filename(&value);
        prop_assert!(!sanitized.chars().any(|c| FORBIDDEN.contains(c)));
        prop_assert!(sanitized.chars().count() <= 100);
        prop_assert!(!sanitized.is_empty());
    }

    #[test]
    fn sanitize_handles_hostile_url_shapes(
        value in "[a-z<>:\"/\\\\|?*=&#._-]{0,150}"
    ) {
        let once = sanitize_for_filename(&value);
        prop_assert_eq!(sanitize_for_filename(&once), once);
    }
}

/// Random DAGs: `n` nodes, edges only from lower to higher indices so the
/// graph is acyclic by construction.
fn arb_dag() -> impl Strategy<Value = (Vec<(String, Vec<String>)>, Vec<bool>)> {
    (1usize..10).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::vec(any::<bool>(), n * n),
            prop::collection::vec(any::<bool>(), n),
        )
            .prop_map(|(n, edges, successes)| {
                let specs: Vec<(String, Vec<String>)> = (0..n)
                    .map(|j| {
                        let deps: Vec<String> = (0..j)
                            .filter(|&i| edges[i * n + j])
                            .map(|i| format!("t{i}"))
                            .collect();
                        (format!("t{j}"), deps)
                    })
                    .collect();
                (specs, successes)
            })
    })
}

proptest! {
    /// Driving any acyclic graph to quiescence terminates every tool exactly
    /// once, never readies a tool before all its prerequisites succeeded,
    /// and only skips tools with a failed (or skipped) prerequisite.
    #[test]
    fn graph_scheduling_invariants((specs, successes) in arb_dag()) {
        let deps_of: HashMap<String, Vec<String>> = specs.iter().cloned().collect();
        let index_of: HashMap<String, usize> = specs
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();

        let mut graph = DependencyGraph::build(&specs).unwrap();
        let mut terminal: HashMap<String, bool> = HashMap::new(); // name -> succeeded
        let mut queue: VecDeque<String> = graph.initial_ready().into();
        let mut seen_ready: HashSet<String> = queue.iter().cloned().collect();

        while let Some(name) = queue.pop_front() {
            // Ready implies every prerequisite already succeeded.
            for dep in &deps_of[&name] {
                prop_assert_eq!(terminal.get(dep), Some(&true));
            }

            let ok = successes[index_of[&name]];
            prop_assert!(terminal.insert(name.clone(), ok).is_none());

            let effects = graph.on_complete(&name, ok);
            for ready in effects.newly_ready {
                prop_assert!(seen_ready.insert(ready.clone()));
                queue.push_back(ready);
            }
            for skipped in effects.skipped {
                // Skipped tools terminate exactly once, with a failed or
                // skipped prerequisite to blame.
                prop_assert!(terminal.insert(skipped.clone(), false).is_none());
                prop_assert!(deps_of[&skipped]
                    .iter()
                    .any(|dep| terminal.get(dep) == Some(&false)));
            }
        }

        prop_assert_eq!(terminal.len(), specs.len());
    }
}
