//! Hook registry and execution
//!
//! Two kinds of hooks: post-hooks run after one tool succeeds (opt-in per
//! tool, sequential, fail-closed for that tool), stage-hooks run once per
//! drained stage (parallel within the stage, errors logged, never fatal).

mod combine;
mod notifier;

pub use combine::CombineOutputHook;
pub use notifier::NotifierHook;

use crate::config::{ScanOptions, Stage};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("hook io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("hook {hook} failed: {message}")]
    Failed { hook: String, message: String },
    #[error("unknown post-hook: {0}")]
    UnknownHook(String),
}

pub type HookResult = Result<(), HookError>;

/// Everything a hook may need: the scan's output directory, the tool that
/// just finished (or the stage that drained), and the scan options.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub scan_dir: PathBuf,
    pub tool_name: String,
    pub stage: Option<Stage>,
    pub options: ScanOptions,
}

impl HookContext {
    pub fn for_tool(scan_dir: PathBuf, tool_name: &str, options: ScanOptions) -> Self {
        Self {
            scan_dir,
            tool_name: tool_name.to_string(),
            stage: None,
            options,
        }
    }

    pub fn for_stage(scan_dir: PathBuf, stage: Stage, options: ScanOptions) -> Self {
        Self {
            scan_dir,
            tool_name: String::new(),
            stage: Some(stage),
            options,
        }
    }
}

/// Runs after one tool's successful completion.
#[async_trait]
pub trait PostHook: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> String;
    async fn execute(&self, ctx: &HookContext) -> HookResult;
}

/// Runs once when every tool of a stage has terminated.
#[async_trait]
pub trait StageHook: Send + Sync {
    async fn execute_for_stage(&self, ctx: &HookContext) -> HookResult;
}

/// Older single-method hook shape, still used by the bundled hooks.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> String {
        String::new()
    }
    async fn run(&self, ctx: &HookContext) -> HookResult;
}

/// Bridges a `Hook` into both registry shapes.
pub struct LegacyHookAdapter {
    inner: Arc<dyn Hook>,
}

impl LegacyHookAdapter {
    pub fn new(inner: Arc<dyn Hook>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl PostHook for LegacyHookAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> String {
        self.inner.description()
    }

    async fn execute(&self, ctx: &HookContext) -> HookResult {
        self.inner.run(ctx).await
    }
}

#[async_trait]
impl StageHook for LegacyHookAdapter {
    async fn execute_for_stage(&self, ctx: &HookContext) -> HookResult {
        self.inner.run(ctx).await
    }
}

/// Post-hooks by name, stage-hooks by stage. Written at startup; reads
/// clone the `Arc` out before awaiting so no lock is held across I/O.
#[derive(Default)]
pub struct HookRegistry {
    post: RwLock<HashMap<String, Arc<dyn PostHook>>>,
    stage: RwLock<HashMap<Stage, Vec<Arc<dyn StageHook>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_post(&self, hook: Arc<dyn PostHook>) {
        let mut post = self.post.write().unwrap();
        if post.insert(hook.name().to_string(), hook.clone()).is_some() {
            tracing::warn!(hook = hook.name(), "Overwriting existing post-hook");
        }
    }

    pub fn register_stage(&self, stage: Stage, hook: Arc<dyn StageHook>) {
        self.stage.write().unwrap().entry(stage).or_default().push(hook);
    }

    /// Convenience for the bundled single-method hooks: register under the
    /// hook's name as a post-hook and under `stage` as a stage-hook.
    pub fn register_legacy(&self, stage: Stage, hook: Arc<dyn Hook>) {
        let adapter = Arc::new(LegacyHookAdapter::new(hook));
        self.register_post(adapter.clone());
        self.register_stage(stage, adapter);
    }

    fn post_hook(&self, name: &str) -> Option<Arc<dyn PostHook>> {
        self.post.read().unwrap().get(name).cloned()
    }

    fn hooks_for_stage(&self, stage: Stage) -> Vec<Arc<dyn StageHook>> {
        self.stage
            .read()
            .unwrap()
            .get(&stage)
            .cloned()
            .unwrap_or_default()
    }

    /// Run a tool's post-hooks sequentially in declaration order. The first
    /// failure is returned and attributed to the tool.
    pub async fn run_post_hooks(&self, names: &[String], ctx: &HookContext) -> HookResult {
        for name in names {
            let hook = self
                .post_hook(name)
                .ok_or_else(|| HookError::UnknownHook(name.clone()))?;
            tracing::debug!(hook = name, tool = %ctx.tool_name, "Running post-hook");
            hook.execute(ctx).await.map_err(|e| HookError::Failed {
                hook: name.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Run every hook of a drained stage in parallel. Failures are logged
    /// and aggregated here; they never fail the pipeline.
    pub async fn run_stage_hooks(&self, stage: Stage, ctx: &HookContext) {
        let hooks = self.hooks_for_stage(stage);
        if hooks.is_empty() {
            return;
        }

        tracing::info!(stage = %stage, hooks = hooks.len(), "Stage drained, running stage hooks");
        let results = join_all(hooks.iter().map(|h| h.execute_for_stage(ctx))).await;
        for result in results {
            if let Err(e) = result {
                tracing::error!(stage = %stage, error = %e, "Stage hook failed");
            }
        }
    }
}
