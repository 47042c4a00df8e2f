//! Tool adapter - wraps one `ToolConfig` as an executable unit
//!
//! Binds scan options into argv per the tool's flag specification, invokes
//! the command runner (replacement mode when configured), and emits
//! best-effort progress events.

use super::runner::{CommandRunner, RunnerError};
use crate::config::{ScanOptions, Stage, ToolConfig};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Interval between `Running` progress events.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("flag binding failed: {0}")]
    Binding(String),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("tool timed out after {0:?}")]
    Timeout(Duration),
}

impl ToolError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ToolError::Runner(RunnerError::Cancelled))
    }
}

/// Progress events emitted while a tool runs. Delivery is best-effort: a
/// full channel drops events rather than blocking the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolProgress {
    pub tool: String,
    pub kind: ProgressKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Started,
    Running,
    Completed,
    Failed,
}

/// An executable unit of the pipeline. Strategies only see this trait, so
/// tests can drive them with in-memory tools.
#[async_trait]
pub trait PipelineTool: Send + Sync {
    fn name(&self) -> &str;
    fn stage(&self) -> Option<Stage>;
    fn depends_on(&self) -> &[String];
    fn post_hooks(&self) -> &[String];
    async fn run(&self, cancel: &CancellationToken, options: &ScanOptions) -> Result<(), ToolError>;
}

/// Production tool backed by an external command.
pub struct ToolAdapter {
    config: ToolConfig,
    runner: CommandRunner,
    progress: Option<mpsc::Sender<ToolProgress>>,
}

impl ToolAdapter {
    pub fn new(config: ToolConfig, runner: CommandRunner) -> Self {
        Self {
            config,
            runner,
            progress: None,
        }
    }

    #[allow(dead_code)] // Progress surface; wired up by callers that listen
    pub fn with_progress(mut self, progress: mpsc::Sender<ToolProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn emit(&self, kind: ProgressKind) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(ToolProgress {
                tool: self.config.name.clone(),
                kind,
            });
        }
    }

    /// Build argv from the flag list and the scan options.
    fn build_args(&self, options: &ScanOptions) -> Result<Vec<String>, ToolError> {
        let mut args = Vec::new();

        for flag in &self.config.flags {
            if flag.is_positional {
                args.push(flag.flag.clone());
                continue;
            }

            if flag.option.is_empty() {
                if flag.is_boolean {
                    if flag.default.is_empty() || flag.default == "true" {
                        args.push(flag.flag.clone());
                    }
                } else if !flag.default.is_empty() {
                    args.push(flag.flag.clone());
                    args.push(flag.default.clone());
                } else {
                    args.push(flag.flag.clone());
                }
                continue;
            }

            let bound = options.field(&flag.option);

            if flag.is_boolean {
                if bound.as_deref() == Some("true") {
                    args.push(flag.flag.clone());
                }
                continue;
            }

            let value = match bound {
                Some(v) if !v.is_empty() => v,
                _ => flag.default.clone(),
            };

            if value.is_empty() {
                if flag.required {
                    return Err(ToolError::Binding(format!(
                        "required flag {} of {} has no value for option {:?}",
                        flag.flag, self.config.name, flag.option
                    )));
                }
                continue;
            }

            args.push(flag.flag.clone());
            args.push(value);
        }

        Ok(args)
    }

    async fn run_once(
        &self,
        cancel: &CancellationToken,
        args: &[String],
    ) -> Result<(), ToolError> {
        if self.config.uses_replacement() {
            self.runner
                .run_with_replacement(
                    cancel,
                    &self.config.command,
                    args,
                    &self.config.replace,
                    Path::new(&self.config.replace_from),
                )
                .await?;
        } else {
            let output = self.runner.run(cancel, &self.config.command, args).await?;
            tracing::debug!(
                tool = %self.config.name,
                stdout_bytes = output.stdout.len(),
                stderr_bytes = output.stderr.len(),
                "Tool finished"
            );
        }
        Ok(())
    }

    /// One attempt under the effective timeout. Timeout is implemented by
    /// cancelling a child token so the runner's own teardown path fires.
    async fn run_attempt(
        &self,
        cancel: &CancellationToken,
        args: &[String],
        effective_timeout: Duration,
    ) -> Result<(), ToolError> {
        let attempt = cancel.child_token();
        let deadline = {
            let attempt = attempt.clone();
            tokio::spawn(async move {
                tokio::time::sleep(effective_timeout).await;
                attempt.cancel();
            })
        };

        let result = self.run_once(&attempt, args).await;
        deadline.abort();

        match result {
            Err(ToolError::Runner(RunnerError::Cancelled)) if !cancel.is_cancelled() => {
                Err(ToolError::Timeout(effective_timeout))
            }
            other => other,
        }
    }
}

#[async_trait]
impl PipelineTool for ToolAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn stage(&self) -> Option<Stage> {
        self.config.stage
    }

    fn depends_on(&self) -> &[String] {
        &self.config.depends_on
    }

    fn post_hooks(&self) -> &[String] {
        &self.config.post_hooks
    }

    async fn run(&self, cancel: &CancellationToken, options: &ScanOptions) -> Result<(), ToolError> {
        let args = match self.build_args(options) {
            Ok(args) => args,
            Err(e) => {
                self.emit(ProgressKind::Failed);
                return Err(e);
            }
        };

        let effective_timeout = self
            .config
            .timeout
            .unwrap_or_else(|| Duration::from_secs(options.timeout));

        self.emit(ProgressKind::Started);
        let ticker_stop = CancellationToken::new();
        let ticker = {
            let stop = ticker_stop.clone();
            let tx = self.progress.clone();
            let tool = self.config.name.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = stop.cancelled() => break,
                        () = tokio::time::sleep(PROGRESS_INTERVAL) => {
                            if let Some(tx) = &tx {
                                let _ = tx.try_send(ToolProgress {
                                    tool: tool.clone(),
                                    kind: ProgressKind::Running,
                                });
                            }
                        }
                    }
                }
            })
        };

        let mut attempts_left = self.config.retries + 1;
        let result = loop {
            attempts_left -= 1;
            match self.run_attempt(cancel, &args, effective_timeout).await {
                Ok(()) => break Ok(()),
                Err(e) if e.is_cancelled() => break Err(e),
                Err(e) if attempts_left > 0 => {
                    tracing::warn!(
                        tool = %self.config.name,
                        error = %e,
                        attempts_left,
                        "Tool attempt failed, retrying"
                    );
                }
                Err(e) => break Err(e),
            }
        };

        ticker_stop.cancel();
        let _ = ticker.await;

        match &result {
            Ok(()) => self.emit(ProgressKind::Completed),
            Err(_) => self.emit(ProgressKind::Failed),
        }
        result
    }
}
