//! ffuf JSON output parsing

use super::{ParseError, ParseResult};
use serde::Deserialize;
use std::path::Path;

/// A `<stem>_ffuf_output.json` file.
#[derive(Debug, Clone, Deserialize)]
pub struct FfufOutput {
    #[serde(default)]
    pub commandline: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub results: Vec<FfufResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FfufResult {
    pub url: String,
    pub status: u16,
}

impl FfufResult {
    /// Directory-fuzzing entry format used in the scan aggregate.
    pub fn describe(&self) -> String {
        format!("{} [{}]", self.url, self.status)
    }
}

pub fn parse_ffuf(path: &Path) -> ParseResult<FfufOutput> {
    let raw = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;

    serde_json::from_str(&raw).map_err(|e| ParseError::Json {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
