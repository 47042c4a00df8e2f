//! Pipeline execution engine
//!
//! Turns a loaded module into runnable tools inside a freshly allocated
//! scan directory, then drives them through the configured execution
//! strategy. The executor submodule owns the one-scan lifecycle.

mod adapter;
mod executor;
mod graph;
mod queue;
mod runner;
mod stages;
mod strategy;

#[cfg(test)]
mod proptests;

pub use adapter::{PipelineTool, ProgressKind, ToolAdapter, ToolError, ToolProgress};
pub use executor::ScanExecutor;
pub use graph::{CompletionEffects, DependencyGraph, GraphError};
pub use queue::{QueueStatus, ScanQueue};
pub use runner::{sanitize_for_filename, CommandRunner, RunnerError};
pub use stages::StageTracker;
pub use strategy::{
    execute_concurrent, execute_hybrid, execute_sequential, ExecutionError,
    PartialExecutionError, StrategyContext, SKIPPED_REASON,
};

use crate::config::{ConfigError, Module, ScanOptions};
use crate::hooks::HookRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("scan directory error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("scan exceeded global timeout of {0:?}")]
    GlobalTimeout(Duration),
    #[error("panic in scan task: {0}")]
    Panic(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// One scan's execution state: the module, its tools, and the scan
/// directory everything runs in.
pub struct Engine {
    module: Module,
    options: ScanOptions,
    tools: Vec<Arc<dyn PipelineTool>>,
    hooks: Arc<HookRegistry>,
    scan_dir: PathBuf,
}

impl Engine {
    /// Wrap a loaded module and allocate a timestamped scan directory under
    /// `scans_base`.
    pub fn from_module(
        module: Module,
        options: ScanOptions,
        hooks: Arc<HookRegistry>,
        scans_base: &Path,
    ) -> EngineResult<Self> {
        let scan_dir = allocate_scan_dir(scans_base, &options)?;
        Ok(Self {
            module,
            options,
            tools: Vec::new(),
            hooks,
            scan_dir,
        })
    }

    /// Validate options and build the tool adapters. Fatal errors surface
    /// here, before anything launches.
    pub fn prepare(&mut self) -> EngineResult<()> {
        self.options.validate()?;
        if self.options.working_dir.is_empty() {
            self.options.working_dir = self.scan_dir.display().to_string();
        }

        self.tools = self
            .module
            .tools
            .iter()
            .map(|config| {
                let runner = CommandRunner::new(
                    self.scan_dir.clone(),
                    self.options.environment.clone(),
                    self.options.dry_run,
                );
                Arc::new(ToolAdapter::new(config.clone(), runner)) as Arc<dyn PipelineTool>
            })
            .collect();

        tracing::info!(
            scan_type = %self.options.scan_type,
            domain = %self.options.domain,
            tools = self.tools.len(),
            mode = %self.module.execution_mode,
            dir = %self.scan_dir.display(),
            "Engine prepared"
        );
        Ok(())
    }

    pub fn scan_dir(&self) -> &Path {
        &self.scan_dir
    }

    pub fn global_timeout(&self) -> Option<Duration> {
        self.module.global_timeout
    }

    /// Run the module's strategy to completion.
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<(), ExecutionError> {
        let ctx = StrategyContext {
            tools: self.tools.clone(),
            hooks: self.hooks.clone(),
            options: self.options.clone(),
            scan_dir: self.scan_dir.clone(),
        };
        strategy::execute(self.module.execution_mode, &ctx, cancel).await
    }
}

/// `<scans_base>/<type>_<sanitised_domain>_<YYYY-MM-DD_HH-MM-SS>/`
fn allocate_scan_dir(scans_base: &Path, options: &ScanOptions) -> std::io::Result<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let dir = scans_base.join(format!(
        "{}_{}_{}",
        options.scan_type,
        sanitize_for_filename(&options.domain),
        timestamp
    ));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
