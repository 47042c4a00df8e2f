//! Pipeline module configuration
//!
//! A module is a YAML-declared pipeline: an ordered set of external tools
//! with flags, dependencies, stage classes, and post-hook wiring. Modules
//! are immutable for the lifetime of a scan.

mod loader;

pub use loader::{config_dir, load_module, load_module_from};

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("module file not found: {0}")]
    ModuleNotFound(String),
    #[error("failed to read module file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse module file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("module has no tools")]
    EmptyModule,
    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),
    #[error("tool {tool} depends on unknown tool {dependency}")]
    UnknownDependency { tool: String, dependency: String },
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// How a module's tools are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Concurrent,
    Hybrid,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Concurrent => write!(f, "concurrent"),
            ExecutionMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Coarse class of a tool, used to fire stage hooks once the class drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SubdomainEnum,
    Recon,
    Fingerprint,
    VulnScan,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::SubdomainEnum => write!(f, "subdomain_enum"),
            Stage::Recon => write!(f, "recon"),
            Stage::Fingerprint => write!(f, "fingerprint"),
            Stage::VulnScan => write!(f, "vuln_scan"),
        }
    }
}

/// One flag of a tool's argv specification.
///
/// `option` names the scan-option field whose value fills the flag; an empty
/// `option` makes this a pure flag. Positional flags append the literal
/// alone, boolean flags are emitted only when the bound value is "true".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagConfig {
    pub flag: String,
    #[serde(default)]
    pub option: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub is_boolean: bool,
    #[serde(default)]
    pub is_positional: bool,
}

/// One external tool in a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default, deserialize_with = "stage_from_str")]
    pub stage: Option<Stage>,
    pub command: String,
    #[serde(default)]
    pub replace: String,
    #[serde(default)]
    pub replace_from: String,
    #[serde(default)]
    pub flags: Vec<FlagConfig>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, deserialize_with = "opt_duration_from_value")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retries: u32,
    #[serde(rename = "posthooks", default)]
    pub post_hooks: Vec<String>,
}

impl ToolConfig {
    /// Replacement mode is active only when both the token and the values
    /// file are configured.
    pub fn uses_replacement(&self) -> bool {
        !self.replace.is_empty() && !self.replace_from.is_empty()
    }
}

/// A YAML-declared pipeline, loaded per scan type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default, deserialize_with = "opt_duration_from_value")]
    pub global_timeout: Option<Duration>,
    pub tools: Vec<ToolConfig>,
}

impl Module {
    /// Structural validation: a non-empty tool list, unique names, and
    /// resolvable dependencies. Cycle detection is the dependency graph's
    /// job at strategy start.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.tools.is_empty() {
            return Err(ConfigError::EmptyModule);
        }

        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ConfigError::DuplicateTool(tool.name.clone()));
            }
        }

        for tool in &self.tools {
            for dep in &tool.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(ConfigError::UnknownDependency {
                        tool: tool.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Per-scan invocation parameters.
///
/// Flags bind against these fields by name; `field` is the accessor the
/// adapter uses at argv-build time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanOptions {
    pub scan_type: String,
    pub domain: String,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl ScanOptions {
    /// Look up an option value by the name a `FlagConfig.option` carries.
    /// Unknown names return `None`; required flags with no default then fail
    /// before launch.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "scan_type" => Some(self.scan_type.clone()),
            "domain" => Some(self.domain.clone()),
            "timeout" => Some(self.timeout.to_string()),
            "working_dir" => Some(self.working_dir.clone()),
            "dry_run" => Some(self.dry_run.to_string()),
            _ => None,
        }
    }

    /// Fatal pre-launch validation, surfaced before any tool starts.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scan_type.is_empty() {
            return Err(ConfigError::InvalidOption("scan_type is empty".into()));
        }
        if self.domain.is_empty() {
            return Err(ConfigError::InvalidOption("domain is empty".into()));
        }
        if self.timeout == 0 {
            return Err(ConfigError::InvalidOption(
                "timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Accepts `type: subdomain_enum` etc., treating an absent or empty string
/// as unstaged.
fn stage_from_str<'de, D>(deserializer: D) -> Result<Option<Stage>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some("subdomain_enum") => Ok(Some(Stage::SubdomainEnum)),
        Some("recon") => Ok(Some(Stage::Recon)),
        Some("fingerprint") => Ok(Some(Stage::Fingerprint)),
        Some("vuln_scan") => Ok(Some(Stage::VulnScan)),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unknown stage type: {other}"
        ))),
    }
}

/// Accepts durations as integer seconds or as `90s` / `10m` / `2h` strings.
fn opt_duration_from_value<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(Raw::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            parse_duration(text)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {text}")))
        }
    }
}

fn parse_duration(text: &str) -> Option<Duration> {
    let (digits, unit) = match text.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => text.split_at(idx),
        None => (text, "s"),
    };
    let value: u64 = digits.parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}
