//! notifier hook
//!
//! Pushes vulnerability findings to the notification sink. Three workers
//! drain the finding queue, each pacing itself 500 ms between sends so a
//! large scan cannot flood the channel.

use super::{Hook, HookContext, HookResult};
use crate::notifications::{NotificationMessage, NotificationSink};
use crate::parsers::{parse_nuclei, NucleiFinding};
use crate::patterns::Severity;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const FINDINGS_FILE: &str = "nuclei_output.json";
const WORKER_COUNT: usize = 3;
const SEND_DELAY: Duration = Duration::from_millis(500);

pub struct NotifierHook {
    sink: Arc<dyn NotificationSink>,
}

impl NotifierHook {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Hook for NotifierHook {
    fn name(&self) -> &str {
        "notifier"
    }

    fn description(&self) -> String {
        "Dispatch non-info findings to the notification sink".to_string()
    }

    async fn run(&self, ctx: &HookContext) -> HookResult {
        let findings_path = ctx.scan_dir.join(FINDINGS_FILE);
        if !findings_path.exists() {
            tracing::debug!(path = %findings_path.display(), "No findings file, nothing to notify");
            return Ok(());
        }

        let output = match parse_nuclei(&findings_path) {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "Could not parse findings for notification");
                return Ok(());
            }
        };

        let notable: VecDeque<NucleiFinding> = output
            .results
            .into_iter()
            .filter(|f| Severity::parse(&f.info.severity) != Severity::Info)
            .collect();
        if notable.is_empty() {
            return Ok(());
        }

        tracing::info!(findings = notable.len(), "Dispatching findings");
        let queue = Arc::new(Mutex::new(notable));
        let domain = ctx.options.domain.clone();

        let workers: Vec<_> = (0..WORKER_COUNT)
            .map(|_| {
                let queue = queue.clone();
                let sink = self.sink.clone();
                let domain = domain.clone();
                tokio::spawn(async move {
                    loop {
                        let finding = { queue.lock().await.pop_front() };
                        let Some(finding) = finding else { break };

                        let severity = Severity::parse(&finding.info.severity);
                        let message = NotificationMessage::new(
                            format!("{} {}", severity.emoji(), finding.info.name),
                            finding.describe(),
                            severity,
                        )
                        .with_field("host", finding.host.clone())
                        .with_field("domain", domain.clone());

                        if let Err(e) = sink.send(&message).await {
                            tracing::error!(error = %e, host = %finding.host, "Notification failed");
                        }
                        tokio::time::sleep(SEND_DELAY).await;
                    }
                })
            })
            .collect();

        for worker in workers {
            let _ = worker.await;
        }
        Ok(())
    }
}
