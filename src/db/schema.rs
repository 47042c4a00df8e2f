//! Database schema and scan types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL schema for initialization
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scans (
    uuid TEXT PRIMARY KEY,
    scan_type TEXT NOT NULL,
    domain TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    number_of_domains INTEGER NOT NULL DEFAULT 0,
    subdomains TEXT NOT NULL DEFAULT '[]',
    screenshots_path TEXT NOT NULL DEFAULT '[]',
    sensitive_patterns TEXT NOT NULL DEFAULT '',
    error_message TEXT,
    failed_tools TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scans_status ON scans(status);
CREATE INDEX IF NOT EXISTS idx_scans_created ON scans(created_at DESC);
"#;

/// Lifecycle status of a scan aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Queued,
    Running,
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl ScanStatus {
    /// Terminal scans are immutable from the core's perspective.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::CompletedWithWarnings | ScanStatus::Failed
        )
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Queued => write!(f, "queued"),
            ScanStatus::Running => write!(f, "running"),
            ScanStatus::Completed => write!(f, "completed"),
            ScanStatus::CompletedWithWarnings => write!(f, "completed_with_warnings"),
            ScanStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Liveness of a discovered subdomain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubdomainStatus {
    #[default]
    Discovered,
    Alive,
    Dead,
}

/// One discovered subdomain and everything the tools learned about it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subdomain {
    /// Full URL form, e.g. `https://www.example.com`.
    pub domain: String,
    #[serde(default)]
    pub open_ports: Vec<String>,
    #[serde(default)]
    pub potential_false_ports: Vec<String>,
    #[serde(default)]
    pub vulns: Vec<String>,
    /// Directory-fuzzing hits, each entry `"<url> [<status>]"`.
    #[serde(default)]
    pub dir_fuzzing: Vec<String>,
    #[serde(default)]
    pub screenshot: String,
    #[serde(default)]
    pub status: SubdomainStatus,
}

impl Subdomain {
    pub fn discovered(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            status: SubdomainStatus::Discovered,
            ..Default::default()
        }
    }
}

/// A tool failure recorded against a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTool {
    pub tool_name: String,
    pub error: String,
}

/// Persisted scan aggregate. Mutated only through the artifact processor and
/// the status manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub uuid: String,
    pub scan_type: String,
    pub domain: String,
    pub status: ScanStatus,
    pub number_of_domains: usize,
    pub subdomains: Vec<Subdomain>,
    /// JSON-encoded list of scan-relative screenshot paths.
    pub screenshots_path: String,
    /// Opaque pattern text handed down to fuzzing analysis.
    pub sensitive_patterns: String,
    pub error_message: Option<String>,
    pub failed_tools: Vec<FailedTool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scan {
    pub fn new(
        uuid: impl Into<String>,
        scan_type: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: uuid.into(),
            scan_type: scan_type.into(),
            domain: domain.into(),
            status: ScanStatus::Queued,
            number_of_domains: 0,
            subdomains: Vec::new(),
            screenshots_path: "[]".to_string(),
            sensitive_patterns: String::new(),
            error_message: None,
            failed_tools: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
