//! nuclei JSONL output parsing

use super::{ParseError, ParseResult};
use serde::Deserialize;
use std::path::Path;

/// Parsed `nuclei_output.json` (one JSON object per line).
#[derive(Debug, Clone, Default)]
pub struct NucleiOutput {
    pub results: Vec<NucleiFinding>,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NucleiFinding {
    #[serde(rename = "template-id", default)]
    pub template_id: String,
    #[serde(default)]
    pub info: NucleiInfo,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "matched-at", default)]
    pub matched_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NucleiInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub severity: String,
}

impl NucleiFinding {
    /// Vulnerability entry format used in the scan aggregate:
    /// `"[<SEVERITY>] <template-name> - <matched-at>"`.
    pub fn describe(&self) -> String {
        let name = if self.info.name.is_empty() {
            &self.template_id
        } else {
            &self.info.name
        };
        format!(
            "[{}] {} - {}",
            self.info.severity.to_uppercase(),
            name,
            self.matched_at
        )
    }
}

/// Parse newline-delimited JSON findings. Unparseable lines are skipped so a
/// finding written mid-flush never poisons the whole file.
pub fn parse_nuclei(path: &Path) -> ParseResult<NucleiOutput> {
    let raw = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut results = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<NucleiFinding>(line) {
            Ok(finding) => results.push(finding),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping malformed nuclei line");
            }
        }
    }

    let count = results.len();
    Ok(NucleiOutput { results, count })
}
