//! Sensitive-path detection for fuzzing results
//!
//! Fuzzed URLs are checked against a built-in trigger list, or against
//! user-supplied regexes when a scan carries its own pattern text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Finding severity, ordered most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Critical => "🔴",
            Severity::High => "🟠",
            Severity::Medium => "🟡",
            Severity::Low => "🔵",
            Severity::Info => "⚪",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// One built-in trigger: a literal path or extension fragment.
#[derive(Debug, Clone, Copy)]
pub struct SensitivePattern {
    pub trigger: &'static str,
    pub severity: Severity,
    pub category: &'static str,
}

/// A match against a fuzzed URL.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub matched: String,
    pub severity: Severity,
    pub category: String,
}

/// Built-in trigger list; matching is case-insensitive substring.
pub const BUILTIN_PATTERNS: &[SensitivePattern] = &[
    SensitivePattern { trigger: "/.env", severity: Severity::Critical, category: "secrets" },
    SensitivePattern { trigger: "/.git", severity: Severity::Critical, category: "vcs-exposure" },
    SensitivePattern { trigger: "/actuator/env", severity: Severity::Critical, category: "secrets" },
    SensitivePattern { trigger: "/actuator/heapdump", severity: Severity::Critical, category: "secrets" },
    SensitivePattern { trigger: ".sql", severity: Severity::Critical, category: "database-dump" },
    SensitivePattern { trigger: "/id_rsa", severity: Severity::Critical, category: "secrets" },
    SensitivePattern { trigger: "/.aws/credentials", severity: Severity::Critical, category: "secrets" },
    SensitivePattern { trigger: "/wp-config.php", severity: Severity::Critical, category: "secrets" },
    SensitivePattern { trigger: "/phpmyadmin", severity: Severity::High, category: "admin-panel" },
    SensitivePattern { trigger: "/admin", severity: Severity::High, category: "admin-panel" },
    SensitivePattern { trigger: "/console", severity: Severity::High, category: "admin-panel" },
    SensitivePattern { trigger: "/jenkins", severity: Severity::High, category: "admin-panel" },
    SensitivePattern { trigger: "/actuator", severity: Severity::High, category: "debug-endpoint" },
    SensitivePattern { trigger: ".bak", severity: Severity::High, category: "backup-file" },
    SensitivePattern { trigger: ".backup", severity: Severity::High, category: "backup-file" },
    SensitivePattern { trigger: "/.svn", severity: Severity::High, category: "vcs-exposure" },
    SensitivePattern { trigger: "/config.json", severity: Severity::High, category: "config-file" },
    SensitivePattern { trigger: "/web.config", severity: Severity::High, category: "config-file" },
    SensitivePattern { trigger: "/swagger", severity: Severity::Medium, category: "api-docs" },
    SensitivePattern { trigger: "/api-docs", severity: Severity::Medium, category: "api-docs" },
    SensitivePattern { trigger: "/graphql", severity: Severity::Medium, category: "api-surface" },
    SensitivePattern { trigger: "/debug", severity: Severity::Medium, category: "debug-endpoint" },
    SensitivePattern { trigger: "/trace", severity: Severity::Medium, category: "debug-endpoint" },
    SensitivePattern { trigger: "/.DS_Store", severity: Severity::Low, category: "metadata-leak" },
    SensitivePattern { trigger: "/server-status", severity: Severity::Low, category: "metadata-leak" },
    SensitivePattern { trigger: "/robots.txt", severity: Severity::Info, category: "metadata-leak" },
    SensitivePattern { trigger: "/sitemap.xml", severity: Severity::Info, category: "metadata-leak" },
];

/// Matcher over either the built-in list or a user override.
pub struct PatternMatcher {
    overrides: Vec<Regex>,
}

impl PatternMatcher {
    /// `override_text` is the scan's `sensitive_patterns` field: one regex
    /// per line, blank lines and `#` comments skipped. Unparseable lines are
    /// logged and dropped; an empty result falls back to the built-in list.
    pub fn new(override_text: &str) -> Self {
        let mut overrides = Vec::new();
        for line in override_text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match Regex::new(&format!("(?i){line}")) {
                Ok(re) => overrides.push(re),
                Err(e) => tracing::warn!(pattern = line, error = %e, "Skipping invalid sensitive pattern"),
            }
        }
        Self { overrides }
    }

    pub fn builtin() -> Self {
        Self { overrides: Vec::new() }
    }

    /// Test a fuzzed URL. Returns the first match.
    pub fn check(&self, url: &str) -> Option<PatternMatch> {
        if !self.overrides.is_empty() {
            return self.overrides.iter().find(|re| re.is_match(url)).map(|re| PatternMatch {
                matched: re.as_str().to_string(),
                severity: Severity::High,
                category: "custom".to_string(),
            });
        }

        let lowered = url.to_ascii_lowercase();
        BUILTIN_PATTERNS
            .iter()
            .find(|p| lowered.contains(&p.trigger.to_ascii_lowercase()))
            .map(|p| PatternMatch {
                matched: p.trigger.to_string(),
                severity: p.severity,
                category: p.category.to_string(),
            })
    }
}
