//! Artifact processor
//!
//! Merges parsed tool outputs into the scan aggregate under the per-scan
//! write lock: screenshots, nmap ports, ffuf directory hits (with sensitive
//! path notifications), and nuclei findings. Passes over an unchanged scan
//! directory are idempotent.

use crate::db::{Database, DbResult, Scan};
use crate::locks::scan_lock;
use crate::notifications::{NotificationMessage, NotificationSink};
use crate::parsers::{parse_ffuf, parse_nmap, parse_nuclei};
use crate::patterns::PatternMatcher;
use std::path::Path;
use std::sync::Arc;

const NMAP_OUTPUT: &str = "nmap_output.xml";
const NUCLEI_OUTPUT: &str = "nuclei_output.json";
const FFUF_SUFFIX: &str = "_ffuf_output.json";
const SCREENSHOT_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png"];

#[derive(Clone)]
pub struct ArtifactProcessor {
    db: Database,
    sink: Arc<dyn NotificationSink>,
}

impl ArtifactProcessor {
    pub fn new(db: Database, sink: Arc<dyn NotificationSink>) -> Self {
        Self { db, sink }
    }

    /// Reload the aggregate, fold in everything currently on disk, persist.
    pub async fn update(&self, scan_id: &str, scan_dir: &Path) -> DbResult<()> {
        let lock = scan_lock(scan_id);
        let _guard = lock.lock().await;

        let mut scan = self.db.get_by_uuid(scan_id)?;

        self.merge_screenshots(&mut scan, scan_dir);
        self.merge_nmap(&mut scan, scan_dir);
        self.merge_ffuf(&mut scan, scan_dir).await;
        self.merge_nuclei(&mut scan, scan_dir);

        self.db.update(&scan)
    }

    /// Collect screenshots and pair them with subdomains by stem.
    fn merge_screenshots(&self, scan: &mut Scan, scan_dir: &Path) {
        let mut names: Vec<String> = match std::fs::read_dir(scan_dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .filter(|name| {
                    Path::new(name)
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|ext| {
                            SCREENSHOT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
                        })
                })
                .collect(),
            Err(e) => {
                tracing::warn!(dir = %scan_dir.display(), error = %e, "Could not list scan directory");
                return;
            }
        };

        names.sort();
        // Case-insensitive de-duplication, first occurrence wins.
        let mut seen = std::collections::HashSet::new();
        names.retain(|name| seen.insert(name.to_ascii_lowercase()));

        let dir_name = scan_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        let relative: Vec<String> = names.iter().map(|n| format!("{dir_name}/{n}")).collect();
        scan.screenshots_path =
            serde_json::to_string(&relative).unwrap_or_else(|_| "[]".to_string());

        for subdomain in &mut scan.subdomains {
            let stripped = strip_scheme(&subdomain.domain);
            let matched = names.iter().position(|name| {
                let stem = Path::new(name)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(name);
                stem.contains(stripped) || stripped.contains(stem)
            });
            if let Some(idx) = matched {
                subdomain.screenshot = format!("{dir_name}/{}", names[idx]);
            }
        }
    }

    /// Fold open ports from nmap output into the matching subdomains.
    fn merge_nmap(&self, scan: &mut Scan, scan_dir: &Path) {
        let path = scan_dir.join(NMAP_OUTPUT);
        if !path.exists() {
            return;
        }

        let hosts = match parse_nmap(&path) {
            Ok(hosts) => hosts,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable nmap output");
                return;
            }
        };

        for host in hosts {
            let described: Vec<String> = host.open_ports.iter().map(|p| p.describe()).collect();
            for hostname in &host.user_hostnames {
                let target = format!("https://{hostname}");
                let Some(subdomain) =
                    scan.subdomains.iter_mut().find(|s| s.domain == target)
                else {
                    tracing::debug!(
                        hostname = %hostname,
                        addresses = ?host.addresses,
                        "No subdomain matches nmap host"
                    );
                    continue;
                };
                if host.likely_false_positive {
                    subdomain.potential_false_ports = described.clone();
                } else {
                    subdomain.open_ports = described.clone();
                }
            }
        }
    }

    /// Fold directory-fuzzing hits into subdomains, notifying on sensitive
    /// paths the first time each hit is recorded.
    async fn merge_ffuf(&self, scan: &mut Scan, scan_dir: &Path) {
        let entries = match std::fs::read_dir(scan_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %scan_dir.display(), error = %e, "Could not list scan directory");
                return;
            }
        };

        let matcher = if scan.sensitive_patterns.trim().is_empty() {
            PatternMatcher::builtin()
        } else {
            PatternMatcher::new(&scan.sensitive_patterns)
        };

        for entry in entries.filter_map(Result::ok) {
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !file_name.ends_with(FFUF_SUFFIX) {
                continue;
            }

            let output = match parse_ffuf(&entry.path()) {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!(file = %file_name, error = %e, "Skipping unreadable ffuf output");
                    continue;
                }
            };
            tracing::debug!(
                file = %file_name,
                results = output.results.len(),
                commandline = %output.commandline,
                time = %output.time,
                "Merging ffuf output"
            );

            let Some(subdomain) = scan
                .subdomains
                .iter_mut()
                .find(|s| file_name.starts_with(&sanitized_stem(&s.domain)))
            else {
                tracing::debug!(file = %file_name, "No subdomain matches ffuf file");
                continue;
            };

            for result in &output.results {
                if !(200..400).contains(&result.status) {
                    continue;
                }
                let entry_text = result.describe();
                if subdomain.dir_fuzzing.contains(&entry_text) {
                    continue;
                }
                subdomain.dir_fuzzing.push(entry_text);

                if let Some(hit) = matcher.check(&result.url) {
                    let message = NotificationMessage::new(
                        format!("{} Sensitive path exposed", hit.severity.emoji()),
                        format!("{} [{}]", result.url, result.status),
                        hit.severity,
                    )
                    .with_field("category", hit.category.clone())
                    .with_field("pattern", hit.matched.clone());
                    if let Err(e) = self.sink.send(&message).await {
                        tracing::error!(url = %result.url, error = %e, "Notification failed");
                    }
                }
            }
        }
    }

    /// Fold nuclei findings into subdomain vulnerability lists.
    fn merge_nuclei(&self, scan: &mut Scan, scan_dir: &Path) {
        let path = scan_dir.join(NUCLEI_OUTPUT);
        if !path.exists() {
            return;
        }

        let output = match parse_nuclei(&path) {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable nuclei output");
                return;
            }
        };
        tracing::debug!(findings = output.count, "Merging nuclei findings");

        for finding in &output.results {
            let finding_host = strip_scheme(if finding.host.is_empty() {
                &finding.url
            } else {
                &finding.host
            });
            if finding_host.is_empty() {
                continue;
            }

            let Some(subdomain) = scan.subdomains.iter_mut().find(|s| {
                let host = strip_scheme(&s.domain);
                host.contains(finding_host) || finding_host.contains(host)
            }) else {
                continue;
            };

            let entry = finding.describe();
            if !subdomain.vulns.contains(&entry) {
                subdomain.vulns.push(entry);
            }
        }
    }
}

fn strip_scheme(domain: &str) -> &str {
    domain
        .strip_prefix("https://")
        .or_else(|| domain.strip_prefix("http://"))
        .unwrap_or(domain)
}

/// ffuf output files are named after the sanitised target:
/// `https://a.example.com` becomes `a.example.com`.
fn sanitized_stem(domain: &str) -> String {
    let flattened = domain.replace("://", ".");
    flattened
        .strip_prefix("https.")
        .or_else(|| flattened.strip_prefix("http."))
        .unwrap_or(&flattened)
        .to_string()
}
