//! Stage tracker
//!
//! Reports each stage exactly once, when every member tool has terminated.
//! Order across stages is unspecified.

use crate::config::Stage;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub struct StageTracker {
    members: HashMap<Stage, HashSet<String>>,
    inner: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    terminated: HashSet<String>,
    reported: HashSet<Stage>,
}

impl StageTracker {
    pub fn new<'a>(tools: impl IntoIterator<Item = (&'a str, Option<Stage>)>) -> Self {
        let mut members: HashMap<Stage, HashSet<String>> = HashMap::new();
        for (name, stage) in tools {
            if let Some(stage) = stage {
                members.entry(stage).or_default().insert(name.to_string());
            }
        }
        Self {
            members,
            inner: Mutex::new(TrackerState::default()),
        }
    }

    /// Record a tool's termination (success or failure). Returns the stages
    /// that just fully drained and have not been reported before.
    pub fn mark_completed(&self, name: &str) -> Vec<Stage> {
        let mut state = self.inner.lock().unwrap();
        state.terminated.insert(name.to_string());

        let mut drained = Vec::new();
        for (stage, members) in &self.members {
            if state.reported.contains(stage) {
                continue;
            }
            if members.iter().all(|m| state.terminated.contains(m)) {
                state.reported.insert(*stage);
                drained.push(*stage);
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_stage_once_when_drained() {
        let tracker = StageTracker::new([
            ("subfinder", Some(Stage::SubdomainEnum)),
            ("amass", Some(Stage::SubdomainEnum)),
            ("httpx", Some(Stage::Recon)),
        ]);

        assert!(tracker.mark_completed("subfinder").is_empty());
        assert_eq!(tracker.mark_completed("amass"), vec![Stage::SubdomainEnum]);
        // A second termination report never re-fires the stage.
        assert!(tracker.mark_completed("amass").is_empty());
        assert_eq!(tracker.mark_completed("httpx"), vec![Stage::Recon]);
    }

    #[test]
    fn unstaged_tools_report_nothing() {
        let tracker = StageTracker::new([("probe", None)]);
        assert!(tracker.mark_completed("probe").is_empty());
    }
}
