//! Module file loading

use super::{ConfigError, ConfigResult, Module};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_DIR: &str = "./config";

/// Directory holding module YAML files, overridable via
/// `PIPELINER_CONFIG_PATH`.
pub fn config_dir() -> PathBuf {
    std::env::var("PIPELINER_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR))
}

/// Load and validate the module for a scan type from
/// `<config_dir>/<scan_type>.yaml`.
pub fn load_module(scan_type: &str) -> ConfigResult<Module> {
    load_module_from(&config_dir(), scan_type)
}

pub fn load_module_from(dir: &Path, scan_type: &str) -> ConfigResult<Module> {
    let path = dir.join(format!("{scan_type}.yaml"));
    if !path.exists() {
        return Err(ConfigError::ModuleNotFound(path.display().to_string()));
    }

    let raw = std::fs::read_to_string(&path)?;
    let module: Module = serde_yaml::from_str(&raw)?;
    module.validate()?;

    tracing::debug!(
        scan_type,
        tools = module.tools.len(),
        mode = %module.execution_mode,
        "Loaded module"
    );
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("quick.yaml"),
            "tools:\n  - name: probe\n    command: probe\n",
        )
        .unwrap();

        let module = load_module_from(dir.path(), "quick").unwrap();
        assert_eq!(module.tools.len(), 1);
        assert_eq!(module.tools[0].name, "probe");
    }

    #[test]
    fn missing_module_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_module_from(dir.path(), "absent").unwrap_err();
        assert!(matches!(err, ConfigError::ModuleNotFound(_)));
    }

    #[test]
    fn bundled_modules_are_valid() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
        for scan_type in ["full", "quick"] {
            let module = load_module_from(&dir, scan_type).unwrap();
            assert!(!module.tools.is_empty(), "{scan_type} has no tools");
        }
    }

    #[test]
    fn invalid_module_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.yaml"), "tools: []\n").unwrap();
        let err = load_module_from(dir.path(), "empty").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyModule));
    }
}
