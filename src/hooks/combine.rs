//! combine_output hook
//!
//! Unifies the output of every subdomain-producing tool into the single
//! input file the liveness probe consumes.

use super::{Hook, HookContext, HookResult};
use async_trait::async_trait;
use std::collections::HashSet;

const OUTPUT_FILE: &str = "httpx_input.txt";
const SUBDOMAIN_PREFIX: &str = "subdomain_";

pub struct CombineOutputHook;

#[async_trait]
impl Hook for CombineOutputHook {
    fn name(&self) -> &str {
        "combine_output"
    }

    fn description(&self) -> String {
        "Merge subdomain_* files into httpx_input.txt, de-duplicating lines".to_string()
    }

    async fn run(&self, ctx: &HookContext) -> HookResult {
        let mut seen = HashSet::new();
        let mut combined = Vec::new();

        let mut sources: Vec<_> = std::fs::read_dir(&ctx.scan_dir)?
            .filter_map(Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(SUBDOMAIN_PREFIX))
            })
            .map(|entry| entry.path())
            .collect();
        sources.sort();

        for path in &sources {
            let content = std::fs::read_to_string(path)?;
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if seen.insert(line.to_string()) {
                    combined.push(line.to_string());
                }
            }
        }

        let output = ctx.scan_dir.join(OUTPUT_FILE);
        std::fs::write(&output, combined.join("\n") + "\n")?;
        tracing::info!(
            sources = sources.len(),
            domains = combined.len(),
            output = %output.display(),
            "Combined subdomain output"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanOptions;

    #[tokio::test]
    async fn merges_and_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("subdomain_subfinder.txt"),
            "a.example.com\nb.example.com\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("subdomain_amass.txt"),
            "b.example.com\nc.example.com\n\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "ignored.example.com\n").unwrap();

        let ctx = HookContext::for_tool(
            dir.path().to_path_buf(),
            "subfinder",
            ScanOptions::default(),
        );
        CombineOutputHook.run(&ctx).await.unwrap();

        let merged = std::fs::read_to_string(dir.path().join("httpx_input.txt")).unwrap();
        let lines: Vec<&str> = merged.lines().collect();
        assert_eq!(lines, vec!["a.example.com", "b.example.com", "c.example.com"]);
    }

    #[tokio::test]
    async fn empty_scan_dir_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = HookContext::for_tool(dir.path().to_path_buf(), "t", ScanOptions::default());
        CombineOutputHook.run(&ctx).await.unwrap();
        assert!(dir.path().join("httpx_input.txt").exists());
    }
}
