//! Execution strategies
//!
//! Three ways to schedule a module's tools: declaration-order sequential,
//! fully concurrent, and the hybrid DAG scheduler with dependency-failure
//! propagation. All three share the post-hook / stage-completion plumbing
//! and report per-tool failures through `PartialExecutionError`.

use super::adapter::PipelineTool;
use super::graph::{DependencyGraph, GraphError};
use super::stages::StageTracker;
use crate::config::{ExecutionMode, ScanOptions};
use crate::db::FailedTool;
use crate::hooks::{HookContext, HookRegistry};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Reason recorded for tools whose prerequisites failed.
pub const SKIPPED_REASON: &str = "skipped due to failed dependency";

/// Some tools failed; the rest of the pipeline still ran.
#[derive(Error, Debug)]
#[error("{} tool(s) failed", failed.len())]
pub struct PartialExecutionError {
    pub failed: Vec<FailedTool>,
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Partial(#[from] PartialExecutionError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("scan cancelled")]
    Cancelled,
}

/// Everything a strategy needs for one scan.
pub struct StrategyContext {
    pub tools: Vec<Arc<dyn PipelineTool>>,
    pub hooks: Arc<HookRegistry>,
    pub options: ScanOptions,
    pub scan_dir: PathBuf,
}

impl StrategyContext {
    fn tracker(&self) -> StageTracker {
        StageTracker::new(self.tools.iter().map(|t| (t.name(), t.stage())))
    }

    fn by_name(&self) -> HashMap<String, Arc<dyn PipelineTool>> {
        self.tools
            .iter()
            .map(|t| (t.name().to_string(), t.clone()))
            .collect()
    }

    /// Post-hooks for one successfully finished tool; the first failure is
    /// attributed to the tool.
    async fn run_post_hooks(&self, tool: &dyn PipelineTool) -> Result<(), String> {
        let ctx = HookContext::for_tool(
            self.scan_dir.clone(),
            tool.name(),
            self.options.clone(),
        );
        self.hooks
            .run_post_hooks(tool.post_hooks(), &ctx)
            .await
            .map_err(|e| format!("post-hook failed: {e}"))
    }

    /// Notify the tracker of a termination and fire hooks for any stage that
    /// just drained.
    async fn mark_terminated(&self, tracker: &StageTracker, name: &str) {
        for stage in tracker.mark_completed(name) {
            let ctx = HookContext::for_stage(self.scan_dir.clone(), stage, self.options.clone());
            self.hooks.run_stage_hooks(stage, &ctx).await;
        }
    }
}

/// Dispatch on the module's execution mode.
pub async fn execute(
    mode: ExecutionMode,
    ctx: &StrategyContext,
    cancel: &CancellationToken,
) -> Result<(), ExecutionError> {
    match mode {
        ExecutionMode::Sequential => execute_sequential(ctx, cancel).await,
        ExecutionMode::Concurrent => execute_concurrent(ctx, cancel).await,
        ExecutionMode::Hybrid => execute_hybrid(ctx, cancel).await,
    }
}

/// Declaration order, one tool at a time. Tools are independent by
/// definition in this mode, so a failure never short-circuits the run.
pub async fn execute_sequential(
    ctx: &StrategyContext,
    cancel: &CancellationToken,
) -> Result<(), ExecutionError> {
    let tracker = ctx.tracker();
    let mut failed = Vec::new();

    for tool in &ctx.tools {
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        tracing::info!(tool = tool.name(), "Running tool");
        let outcome = match tool.run(cancel, &ctx.options).await {
            Ok(()) => ctx.run_post_hooks(tool.as_ref()).await,
            Err(e) if e.is_cancelled() && cancel.is_cancelled() => {
                return Err(ExecutionError::Cancelled);
            }
            Err(e) => Err(e.to_string()),
        };

        if let Err(error) = outcome {
            tracing::error!(tool = tool.name(), error = %error, "Tool failed");
            failed.push(FailedTool {
                tool_name: tool.name().to_string(),
                error,
            });
        }
        ctx.mark_terminated(&tracker, tool.name()).await;
    }

    finish(failed)
}

/// Every tool on its own task. Post-hooks and stage completions run
/// sequentially afterwards, in completion order rather than declaration
/// order.
pub async fn execute_concurrent(
    ctx: &StrategyContext,
    cancel: &CancellationToken,
) -> Result<(), ExecutionError> {
    let tracker = ctx.tracker();
    let by_name = ctx.by_name();
    let total = ctx.tools.len();
    let (tx, mut rx) = mpsc::channel::<(String, Result<(), String>)>(total.max(1));

    for tool in &ctx.tools {
        let tool = tool.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        let options = ctx.options.clone();
        tokio::spawn(async move {
            let result = tool
                .run(&cancel, &options)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send((tool.name().to_string(), result)).await;
        });
    }
    drop(tx);

    let mut failed = Vec::new();
    let mut completed = 0;
    while completed < total {
        let Some((name, result)) = rx.recv().await else {
            break;
        };
        completed += 1;

        let Some(tool) = by_name.get(&name) else {
            continue;
        };

        let outcome = match result {
            Ok(()) => ctx.run_post_hooks(tool.as_ref()).await,
            Err(e) => Err(e),
        };
        if let Err(error) = outcome {
            tracing::error!(tool = %name, error = %error, "Tool failed");
            failed.push(FailedTool {
                tool_name: name.clone(),
                error,
            });
        }
        ctx.mark_terminated(&tracker, &name).await;
    }

    if cancel.is_cancelled() {
        return Err(ExecutionError::Cancelled);
    }
    finish(failed)
}

/// DAG scheduler: a worker pool sized to the host's cores drains a `ready`
/// channel, results feed back to this loop, and failures propagate skips
/// through the graph.
pub async fn execute_hybrid(
    ctx: &StrategyContext,
    cancel: &CancellationToken,
) -> Result<(), ExecutionError> {
    let specs: Vec<(String, Vec<String>)> = ctx
        .tools
        .iter()
        .map(|t| (t.name().to_string(), t.depends_on().to_vec()))
        .collect();
    let mut graph = DependencyGraph::build(&specs)?;
    let tracker = ctx.tracker();
    let by_name = ctx.by_name();

    let total = graph.len();
    let worker_count = num_cpus::get().max(1).min(total.max(1));
    let (ready_tx, ready_rx) = mpsc::channel::<String>(total.max(1));
    let ready_rx = Arc::new(Mutex::new(ready_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<(String, Result<(), String>)>(total.max(1));

    let worker_cancel = cancel.child_token();
    let workers: Vec<_> = (0..worker_count)
        .map(|_| {
            let ready_rx = ready_rx.clone();
            let result_tx = result_tx.clone();
            let by_name = by_name.clone();
            let options = ctx.options.clone();
            let worker_cancel = worker_cancel.clone();
            tokio::spawn(async move {
                loop {
                    let name = { ready_rx.lock().await.recv().await };
                    let Some(name) = name else { break };
                    let Some(tool) = by_name.get(&name) else { break };

                    let result = tool
                        .run(&worker_cancel, &options)
                        .await
                        .map_err(|e| e.to_string());
                    if result_tx.send((name, result)).await.is_err() {
                        break;
                    }
                }
            })
        })
        .collect();
    drop(result_tx);

    for name in graph.initial_ready() {
        let _ = ready_tx.send(name).await;
    }

    let mut failed = Vec::new();
    let mut completed = 0usize;

    while completed < total {
        tokio::select! {
            () = cancel.cancelled() => {
                worker_cancel.cancel();
                drop(ready_tx);
                for worker in workers {
                    let _ = worker.await;
                }
                return Err(ExecutionError::Cancelled);
            }
            received = result_rx.recv() => {
                let Some((name, result)) = received else { break };
                completed += 1;

                let success = match result {
                    Ok(()) => match ctx.run_post_hooks(by_name[&name].as_ref()).await {
                        Ok(()) => true,
                        Err(error) => {
                            tracing::error!(tool = %name, error = %error, "Post-hook failed");
                            failed.push(FailedTool { tool_name: name.clone(), error });
                            false
                        }
                    },
                    Err(error) => {
                        tracing::error!(tool = %name, error = %error, "Tool failed");
                        failed.push(FailedTool { tool_name: name.clone(), error });
                        false
                    }
                };
                ctx.mark_terminated(&tracker, &name).await;

                let effects = graph.on_complete(&name, success);
                for ready in effects.newly_ready {
                    let _ = ready_tx.send(ready).await;
                }
                for skipped in effects.skipped {
                    tracing::warn!(tool = %skipped, "Skipping tool, prerequisite failed");
                    completed += 1;
                    failed.push(FailedTool {
                        tool_name: skipped.clone(),
                        error: SKIPPED_REASON.to_string(),
                    });
                    ctx.mark_terminated(&tracker, &skipped).await;
                }
            }
        }
    }

    drop(ready_tx);
    for worker in workers {
        let _ = worker.await;
    }

    finish(failed)
}

fn finish(failed: Vec<FailedTool>) -> Result<(), ExecutionError> {
    if failed.is_empty() {
        Ok(())
    } else {
        Err(PartialExecutionError { failed }.into())
    }
}
