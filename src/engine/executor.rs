//! Scan executor - one scan's lifecycle
//!
//! queued -> running -> completed | completed_with_warnings | failed.
//! Acquires a queue slot, runs the engine with the artifact monitor
//! alongside, then classifies the strategy's outcome. Panics inside the
//! scan task are recovered and recorded as failures.

use super::{Engine, EngineError, ExecutionError, ScanQueue};
use crate::config::{load_module, load_module_from, Module, ScanOptions};
use crate::db::Database;
use crate::hooks::HookRegistry;
use crate::locks;
use crate::monitor::{ArtifactProcessor, MonitorTuning, ScanMonitor};
use crate::notifications::NotificationSink;
use crate::status::StatusManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long the executor waits for the monitor's final pass before moving
/// on. Overruns are logged; the scan is finalised regardless.
const MONITOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ScanExecutor {
    db: Database,
    hooks: Arc<HookRegistry>,
    sink: Arc<dyn NotificationSink>,
    queue: Arc<ScanQueue>,
    status: StatusManager,
    monitor_tuning: MonitorTuning,
    module_dir: Option<PathBuf>,
    scans_base: PathBuf,
}

impl ScanExecutor {
    pub fn new(
        db: Database,
        hooks: Arc<HookRegistry>,
        sink: Arc<dyn NotificationSink>,
        queue: Arc<ScanQueue>,
    ) -> Self {
        let status = StatusManager::new(db.clone());
        Self {
            db,
            hooks,
            sink,
            queue,
            status,
            monitor_tuning: MonitorTuning::default(),
            module_dir: None,
            scans_base: PathBuf::from("./scans"),
        }
    }

    pub fn with_module_dir(mut self, dir: PathBuf) -> Self {
        self.module_dir = Some(dir);
        self
    }

    pub fn with_scans_base(mut self, base: PathBuf) -> Self {
        self.scans_base = base;
        self
    }

    pub fn with_monitor_tuning(mut self, tuning: MonitorTuning) -> Self {
        self.monitor_tuning = tuning;
        self
    }

    /// Drive one scan to a terminal status. The queued scan row must
    /// already exist; this blocks until the scan is finalised.
    pub async fn execute_scan(self: Arc<Self>, scan_id: String, options: ScanOptions) {
        let task = {
            let this = self.clone();
            let scan_id = scan_id.clone();
            tokio::spawn(async move {
                this.queue
                    .execute(|| this.run_pipeline(&scan_id, &options))
                    .await
            })
        };

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(join_err) if join_err.is_panic() => {
                Err(EngineError::Panic(panic_message(join_err.into_panic())))
            }
            Err(_) => Err(EngineError::Execution(ExecutionError::Cancelled)),
        };

        self.finalise(&scan_id, outcome).await;
    }

    /// The body that runs while holding a queue slot.
    async fn run_pipeline(
        &self,
        scan_id: &str,
        options: &ScanOptions,
    ) -> Result<(), EngineError> {
        if let Err(e) = self.status.mark_running(scan_id).await {
            tracing::warn!(scan = scan_id, error = %e, "Could not mark scan running");
        }

        let module = self.load(&options.scan_type)?;
        let mut engine = Engine::from_module(
            module,
            options.clone(),
            self.hooks.clone(),
            &self.scans_base,
        )?;
        engine.prepare()?;

        let cancel = CancellationToken::new();
        let monitor_cancel = cancel.child_token();
        let monitor_task = {
            let monitor = ScanMonitor::new(
                self.db.clone(),
                ArtifactProcessor::new(self.db.clone(), self.sink.clone()),
            )
            .with_tuning(self.monitor_tuning);
            let scan_id = scan_id.to_string();
            let scan_dir = engine.scan_dir().to_path_buf();
            let monitor_cancel = monitor_cancel.clone();
            tokio::spawn(async move { monitor.run(scan_id, scan_dir, monitor_cancel).await })
        };

        // The strategy runs in its own task so a global-timeout overrun can
        // cancel it and still let it unwind cooperatively (terminating any
        // child processes) before the scan is finalised.
        let global_timeout = engine.global_timeout();
        let mut strategy_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.execute(&cancel).await })
        };

        let result = match global_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut strategy_task).await {
                Ok(joined) => flatten_strategy(joined),
                Err(_) => {
                    cancel.cancel();
                    let _ = strategy_task.await;
                    Err(EngineError::GlobalTimeout(limit))
                }
            },
            None => flatten_strategy(strategy_task.await),
        };

        // Strategy is done; let the monitor do its final pass.
        monitor_cancel.cancel();
        if tokio::time::timeout(MONITOR_SHUTDOWN_TIMEOUT, monitor_task)
            .await
            .is_err()
        {
            tracing::warn!(scan = scan_id, "Monitor shutdown exceeded 30s, finalising anyway");
        }

        result
    }

    fn load(&self, scan_type: &str) -> Result<Module, EngineError> {
        let module = match &self.module_dir {
            Some(dir) => load_module_from(dir, scan_type)?,
            None => load_module(scan_type)?,
        };
        Ok(module)
    }

    /// Map the pipeline outcome onto a terminal scan status.
    async fn finalise(&self, scan_id: &str, outcome: Result<(), EngineError>) {
        let persisted = match outcome {
            Ok(()) => self.status.mark_completed(scan_id).await,
            Err(EngineError::Execution(ExecutionError::Partial(partial))) => {
                self.status
                    .mark_completed_with_warnings(scan_id, partial.failed)
                    .await
            }
            Err(e) => self.status.mark_failed(scan_id, &e.to_string()).await,
        };
        if let Err(e) = persisted {
            tracing::error!(scan = scan_id, error = %e, "Could not persist terminal status");
        }
        locks::forget_scan_lock(scan_id);
    }
}

fn flatten_strategy(
    joined: Result<Result<(), ExecutionError>, tokio::task::JoinError>,
) -> Result<(), EngineError> {
    match joined {
        Ok(result) => result.map_err(EngineError::from),
        Err(join_err) if join_err.is_panic() => {
            Err(EngineError::Panic(panic_message(join_err.into_panic())))
        }
        Err(_) => Err(EngineError::Execution(ExecutionError::Cancelled)),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
