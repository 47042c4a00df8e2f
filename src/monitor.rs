//! Artifact monitor
//!
//! Two fibres per scan, both joined before the monitor returns: one tails
//! `httpx_output.txt` and appends discovered subdomains to the aggregate in
//! file-byte order, the other debounces filesystem events in the scan
//! directory and hands them to the artifact processor. Both perform a final
//! pass on cancellation, and neither can fail the scan: internal errors are
//! logged and retried on the next tick.

mod processor;

pub use processor::ArtifactProcessor;

use crate::db::{Database, DbResult, Subdomain};
use crate::locks::scan_lock;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SUBDOMAIN_OUTPUT: &str = "httpx_output.txt";
const NMAP_OUTPUT: &str = "nmap_output.xml";
const FFUF_SUFFIX: &str = "_ffuf_output.json";
const SCREENSHOT_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png"];

/// Loop timings, overridable in tests.
#[derive(Debug, Clone, Copy)]
pub struct MonitorTuning {
    /// Existence poll for the subdomain output file.
    pub discovery_poll: Duration,
    /// How long to keep polling before giving up on the file.
    pub discovery_timeout: Duration,
    /// Flush interval for buffered subdomain writes.
    pub subdomain_flush: Duration,
    /// Debounce interval for artifact events.
    pub artifact_debounce: Duration,
}

impl Default for MonitorTuning {
    fn default() -> Self {
        Self {
            discovery_poll: Duration::from_millis(500),
            discovery_timeout: Duration::from_secs(5 * 60),
            subdomain_flush: Duration::from_secs(2),
            artifact_debounce: Duration::from_secs(3),
        }
    }
}

#[derive(Clone)]
pub struct ScanMonitor {
    db: Database,
    processor: ArtifactProcessor,
    tuning: MonitorTuning,
}

impl ScanMonitor {
    pub fn new(db: Database, processor: ArtifactProcessor) -> Self {
        Self {
            db,
            processor,
            tuning: MonitorTuning::default(),
        }
    }

    pub fn with_tuning(mut self, tuning: MonitorTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Watch one scan until cancellation. Returns only after both fibres
    /// have completed their final pass.
    pub async fn run(&self, scan_id: String, scan_dir: PathBuf, cancel: CancellationToken) {
        let subdomains = {
            let db = self.db.clone();
            let scan_id = scan_id.clone();
            let scan_dir = scan_dir.clone();
            let tuning = self.tuning;
            let cancel = cancel.clone();
            tokio::spawn(subdomain_loop(db, scan_id, scan_dir, tuning, cancel))
        };
        let artifacts = {
            let processor = self.processor.clone();
            let tuning = self.tuning;
            tokio::spawn(artifact_loop(processor, scan_id, scan_dir, tuning, cancel))
        };

        let _ = subdomains.await;
        let _ = artifacts.await;
    }
}

/// Bridge a filesystem watcher into a tokio channel. `None` when the
/// watcher cannot be created; callers degrade to pure polling.
fn spawn_watcher(path: &Path) -> Option<(RecommendedWatcher, mpsc::Receiver<Event>)> {
    let (tx, rx) = mpsc::channel(256);
    let mut watcher = match RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.blocking_send(event);
            }
        },
        notify::Config::default(),
    ) {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not create watcher, falling back to polling");
            return None;
        }
    };

    if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
        tracing::warn!(path = %path.display(), error = %e, "Could not watch path, falling back to polling");
        return None;
    }
    Some((watcher, rx))
}

fn is_write_event(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Tail the subdomain output file and stream new lines into the aggregate.
async fn subdomain_loop(
    db: Database,
    scan_id: String,
    scan_dir: PathBuf,
    tuning: MonitorTuning,
    cancel: CancellationToken,
) {
    let path = scan_dir.join(SUBDOMAIN_OUTPUT);

    // Wait for the probing tool to create its output file.
    let deadline = tokio::time::Instant::now() + tuning.discovery_timeout;
    while !path.exists() {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(scan = %scan_id, "Subdomain output never appeared, giving up");
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(tuning.discovery_poll) => {}
            () = cancel.cancelled() => return,
        }
    }

    let watcher = spawn_watcher(&path);
    let polling = watcher.is_none();
    let mut events = watcher;

    let mut last_size = 0u64;
    // The file may already carry content by the time the watch starts.
    let mut pending = true;
    let mut flush = tokio::time::interval(tuning.subdomain_flush);
    flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = recv_event(&mut events) => {
                if event.as_ref().is_some_and(is_write_event) {
                    pending = true;
                }
            }
            _ = flush.tick() => {
                if pending || polling {
                    match process_subdomains(&db, &scan_id, &path, &mut last_size).await {
                        Ok(()) => pending = false,
                        Err(e) => {
                            tracing::warn!(scan = %scan_id, error = %e, "Subdomain update failed, will retry");
                        }
                    }
                }
            }
            () = cancel.cancelled() => {
                if let Err(e) = process_subdomains(&db, &scan_id, &path, &mut last_size).await {
                    tracing::warn!(scan = %scan_id, error = %e, "Final subdomain pass failed");
                }
                return;
            }
        }
    }
}

/// Receive from the watcher when present, otherwise park forever (the tick
/// branch drives pure polling).
async fn recv_event(
    events: &mut Option<(RecommendedWatcher, mpsc::Receiver<Event>)>,
) -> Option<Event> {
    match events {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read bytes `[last_size, len)` of the output file and append each
/// non-blank, non-comment line as a discovered subdomain. No-op when the
/// file did not grow. Advances `last_size` only after a successful persist.
async fn process_subdomains(
    db: &Database,
    scan_id: &str,
    path: &Path,
    last_size: &mut u64,
) -> DbResult<()> {
    let current = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Could not stat subdomain output");
            return Ok(());
        }
    };
    if current <= *last_size {
        return Ok(());
    }

    let chunk = match read_range(path, *last_size, current) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not read subdomain output");
            return Ok(());
        }
    };
    let consumed = chunk.len() as u64;

    let lines: Vec<String> = String::from_utf8_lossy(&chunk)
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    let lock = scan_lock(scan_id);
    let _guard = lock.lock().await;

    let mut scan = db.get_by_uuid(scan_id)?;
    for line in lines {
        scan.subdomains.push(Subdomain::discovered(line));
    }
    scan.number_of_domains = scan.subdomains.len();
    db.update(&scan)?;

    *last_size += consumed;
    Ok(())
}

fn read_range(path: &Path, from: u64, to: u64) -> std::io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(from))?;
    let mut buf = vec![0u8; (to - from) as usize];
    // Short reads are fine; unread bytes are picked up next pass.
    let n = file.read(&mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

/// Debounce artifact events and flush them through the processor.
async fn artifact_loop(
    processor: ArtifactProcessor,
    scan_id: String,
    scan_dir: PathBuf,
    tuning: MonitorTuning,
    cancel: CancellationToken,
) {
    let watcher = spawn_watcher(&scan_dir);
    let polling = watcher.is_none();
    let mut events = watcher;

    let mut pending = false;
    let mut debounce = tokio::time::interval(tuning.artifact_debounce);
    debounce.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = recv_event(&mut events) => {
                if event.as_ref().is_some_and(|e| is_write_event(e) && qualifies(e)) {
                    pending = true;
                }
            }
            _ = debounce.tick() => {
                if pending || polling {
                    match processor.update(&scan_id, &scan_dir).await {
                        Ok(()) => pending = false,
                        Err(e) => {
                            tracing::warn!(scan = %scan_id, error = %e, "Artifact update failed, will retry");
                        }
                    }
                }
            }
            () = cancel.cancelled() => {
                if let Err(e) = processor.update(&scan_id, &scan_dir).await {
                    tracing::warn!(scan = %scan_id, error = %e, "Final artifact pass failed");
                }
                return;
            }
        }
    }
}

/// Only screenshot images, the nmap report, and ffuf output files warrant a
/// processor pass.
fn qualifies(event: &Event) -> bool {
    event.paths.iter().any(|path| {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name == NMAP_OUTPUT || name.ends_with(FFUF_SUFFIX) {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SCREENSHOT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Scan, SubdomainStatus};
    use crate::notifications::NullSink;
    use std::io::Write;
    use std::sync::Arc;

    fn test_tuning() -> MonitorTuning {
        MonitorTuning {
            discovery_poll: Duration::from_millis(10),
            discovery_timeout: Duration::from_secs(5),
            subdomain_flush: Duration::from_millis(50),
            artifact_debounce: Duration::from_millis(50),
        }
    }

    fn monitor(db: &Database) -> ScanMonitor {
        ScanMonitor::new(
            db.clone(),
            ArtifactProcessor::new(db.clone(), Arc::new(NullSink)),
        )
        .with_tuning(test_tuning())
    }

    #[tokio::test]
    async fn ingests_grown_subdomain_file_in_order() {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        db.save(&Scan::new("s1", "full", "example.com")).unwrap();

        let cancel = CancellationToken::new();
        let m = monitor(&db);
        let run = {
            let cancel = cancel.clone();
            let dir = dir.path().to_path_buf();
            tokio::spawn(async move { m.run("s1".into(), dir, cancel).await })
        };

        let path = dir.path().join(SUBDOMAIN_OUTPUT);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "https://a.example.com").unwrap();
        writeln!(file, "# comment").unwrap();
        file.sync_all().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        writeln!(file, "https://b.example.com").unwrap();
        writeln!(file).unwrap();
        file.sync_all().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        writeln!(file, "https://c.example.com").unwrap();
        file.sync_all().unwrap();

        cancel.cancel();
        run.await.unwrap();

        let scan = db.get_by_uuid("s1").unwrap();
        let domains: Vec<&str> = scan.subdomains.iter().map(|s| s.domain.as_str()).collect();
        assert_eq!(
            domains,
            vec![
                "https://a.example.com",
                "https://b.example.com",
                "https://c.example.com"
            ]
        );
        assert_eq!(scan.number_of_domains, 3);
        assert!(scan
            .subdomains
            .iter()
            .all(|s| s.status == SubdomainStatus::Discovered));
    }

    #[tokio::test]
    async fn byte_range_processing_is_incremental() {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        db.save(&Scan::new("s1", "full", "example.com")).unwrap();

        let path = dir.path().join(SUBDOMAIN_OUTPUT);
        let mut last_size = 0u64;

        std::fs::write(&path, "https://a.example.com\n").unwrap();
        process_subdomains(&db, "s1", &path, &mut last_size)
            .await
            .unwrap();
        assert_eq!(db.get_by_uuid("s1").unwrap().number_of_domains, 1);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "https://b.example.com").unwrap();
        drop(file);
        process_subdomains(&db, "s1", &path, &mut last_size)
            .await
            .unwrap();

        let scan = db.get_by_uuid("s1").unwrap();
        assert_eq!(scan.number_of_domains, 2);
        assert_eq!(scan.subdomains[1].domain, "https://b.example.com");
    }

    #[tokio::test]
    async fn unchanged_file_is_a_noop() {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        db.save(&Scan::new("s1", "full", "example.com")).unwrap();

        let path = dir.path().join(SUBDOMAIN_OUTPUT);
        std::fs::write(&path, "https://a.example.com\n").unwrap();

        let mut last_size = 0u64;
        process_subdomains(&db, "s1", &path, &mut last_size)
            .await
            .unwrap();
        let before = last_size;
        process_subdomains(&db, "s1", &path, &mut last_size)
            .await
            .unwrap();

        assert_eq!(last_size, before);
        assert_eq!(db.get_by_uuid("s1").unwrap().number_of_domains, 1);
    }

    #[tokio::test]
    async fn final_pass_flushes_artifacts_on_cancel() {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut scan = Scan::new("s1", "full", "example.com");
        scan.subdomains = vec![Subdomain::discovered("https://a.example.com")];
        db.save(&scan).unwrap();

        std::fs::write(dir.path().join("a.example.com.png"), b"img").unwrap();

        let cancel = CancellationToken::new();
        let m = monitor(&db);
        let run = {
            let cancel = cancel.clone();
            let dir = dir.path().to_path_buf();
            tokio::spawn(async move { m.run("s1".into(), dir, cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        run.await.unwrap();

        let scan = db.get_by_uuid("s1").unwrap();
        assert!(scan.screenshots_path.contains("a.example.com.png"));
    }

    #[test]
    fn qualifying_artifact_names() {
        let event = |name: &str| Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from(format!("/scans/x/{name}"))],
            attrs: Default::default(),
        };
        assert!(qualifies(&event("shot.png")));
        assert!(qualifies(&event("shot.JPG")));
        assert!(qualifies(&event("nmap_output.xml")));
        assert!(qualifies(&event("a.example.com_ffuf_output.json")));
        assert!(!qualifies(&event("httpx_output.txt")));
        assert!(!qualifies(&event("nuclei_output.json")));
    }
}
