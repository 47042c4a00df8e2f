//! API request and response types

use serde::{Deserialize, Serialize};

/// Request to start a scan
#[derive(Debug, Deserialize)]
pub struct StartScanRequest {
    pub scan_type: String,
    pub domain: String,
    /// Per-tool timeout in seconds when a tool carries none of its own.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub dry_run: bool,
    /// Optional newline-delimited regex overrides for sensitive-path
    /// detection.
    #[serde(default)]
    pub sensitive_patterns: String,
}

fn default_timeout() -> u64 {
    600
}

/// Response after enqueueing a scan
#[derive(Debug, Serialize)]
pub struct StartScanResponse {
    pub uuid: String,
    pub status: String,
}

/// Response with a list of scans
#[derive(Debug, Serialize)]
pub struct ScanListResponse {
    pub scans: Vec<serde_json::Value>,
}

/// Pagination parameters for scan listing
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

/// Response for delete
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error payload
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
