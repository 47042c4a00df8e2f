//! Command runner - executes one external tool invocation
//!
//! Commands and argv are validated before launch, script commands get an
//! interpreter prepended, and children run in their own process group so
//! cancellation can tear down the whole tree (SIGTERM, then SIGKILL after a
//! grace period).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
#[allow(unused_imports)]
use std::os::unix::process::CommandExt;

const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Shell metacharacters rejected in arguments.
const DANGEROUS_CHARS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>', '\n'];

/// Extensions that mark an argument as a filename during replacement mode.
const FILE_EXTENSIONS: &[&str] = &[".txt", ".json", ".xml", ".csv", ".html", ".log", ".out"];

/// Substrings that mark an argument as a filename during replacement mode.
const FILENAME_INDICATORS: &[&str] = &["output", "result", "scan", "report", "log", "file"];

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("command is empty")]
    EmptyCommand,
    #[error("command not found on disk: {0}")]
    CommandNotFound(String),
    #[error("command is a symlink: {0}")]
    SymlinkCommand(String),
    #[error("command contains invalid characters: {0}")]
    InvalidCommand(String),
    #[error("dangerous character {character:?} in argument {arg:?}")]
    DangerousArgument { arg: String, character: char },
    #[error("path traversal in argument {0:?}")]
    PathTraversal(String),
    #[error("failed to read values file {path}: {source}")]
    ValuesFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
    #[error("command cancelled")]
    Cancelled,
}

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Captured output of a completed command.
#[derive(Debug, Default)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes commands inside one scan's working directory.
pub struct CommandRunner {
    working_dir: PathBuf,
    environment: HashMap<String, String>,
    dry_run: bool,
}

impl CommandRunner {
    pub fn new(working_dir: PathBuf, environment: HashMap<String, String>, dry_run: bool) -> Self {
        Self {
            working_dir,
            environment,
            dry_run,
        }
    }

    /// Run one command to completion. Cancellation terminates the child's
    /// process group and returns `RunnerError::Cancelled`.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        command: &str,
        args: &[String],
    ) -> RunnerResult<RunOutput> {
        validate_command(command)?;
        for arg in args {
            validate_argument(arg)?;
        }

        let argv = build_argv(command, args);

        if self.dry_run {
            tracing::info!(argv = ?argv, dir = %self.working_dir.display(), "Dry run, skipping execution");
            return Ok(RunOutput::default());
        }

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&self.working_dir)
            .envs(&self.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // New process group, so cancellation reaches grandchildren too.
        // Unix teardown is SIGTERM + delayed SIGKILL on the group; elsewhere
        // the runtime kills the direct child when its handle drops.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                    .ok();
                Ok(())
            });
        }
        #[cfg(not(unix))]
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            command: argv[0].clone(),
            source,
        })?;
        let pid = child.id();

        tokio::select! {
            result = child.wait_with_output() => {
                let output = result.map_err(|source| RunnerError::Spawn {
                    command: argv[0].clone(),
                    source,
                })?;

                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

                if output.status.success() {
                    Ok(RunOutput { stdout, stderr })
                } else {
                    Err(RunnerError::NonZeroExit {
                        code: output.status.code().unwrap_or(-1),
                        stderr,
                    })
                }
            }
            () = cancel.cancelled() => {
                if let Some(pid) = pid {
                    terminate_process_group(pid);
                }
                Err(RunnerError::Cancelled)
            }
        }
    }

    /// Replacement mode: re-run the command once per line of the values
    /// file, substituting the token inside each argument. Filename-shaped
    /// arguments receive a sanitised copy of the value. Per-value failures
    /// are logged and the loop continues.
    pub async fn run_with_replacement(
        &self,
        cancel: &CancellationToken,
        command: &str,
        args: &[String],
        token: &str,
        values_file: &Path,
    ) -> RunnerResult<()> {
        let values_path = if values_file.is_absolute() {
            values_file.to_path_buf()
        } else {
            self.working_dir.join(values_file)
        };
        let raw = std::fs::read_to_string(&values_path).map_err(|source| RunnerError::ValuesFile {
            path: values_path.display().to_string(),
            source,
        })?;

        for line in raw.lines() {
            let value = line.trim();
            if value.is_empty() || value.starts_with('#') {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(RunnerError::Cancelled);
            }

            let substituted: Vec<String> = args
                .iter()
                .map(|arg| {
                    if !arg.contains(token) {
                        return arg.clone();
                    }
                    if is_filename_arg(arg) {
                        arg.replace(token, &sanitize_for_filename(value))
                    } else {
                        arg.replace(token, value)
                    }
                })
                .collect();

            if let Err(e) = self.run(cancel, command, &substituted).await {
                if matches!(e, RunnerError::Cancelled) {
                    return Err(e);
                }
                tracing::warn!(command, value, error = %e, "Replacement iteration failed");
            }
        }

        Ok(())
    }
}

/// SIGTERM the group now, SIGKILL it after the grace period. Fire-and-forget
/// so cancellation stays prompt.
#[cfg(unix)]
fn terminate_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(pid as i32);
    let _ = killpg(pgid, Signal::SIGTERM);
    tokio::spawn(async move {
        tokio::time::sleep(KILL_GRACE_PERIOD).await;
        let _ = killpg(pgid, Signal::SIGKILL);
    });
}

#[cfg(not(unix))]
fn terminate_process_group(_pid: u32) {
    // kill_on_drop already covers non-unix targets.
}

fn validate_command(command: &str) -> RunnerResult<()> {
    if command.is_empty() {
        return Err(RunnerError::EmptyCommand);
    }

    // Bare binaries resolve through PATH; only extension-bearing commands
    // are required to exist as files.
    let path = Path::new(command);
    if path.extension().is_some() {
        if !command
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
        {
            return Err(RunnerError::InvalidCommand(command.to_string()));
        }
        let metadata = std::fs::symlink_metadata(path)
            .map_err(|_| RunnerError::CommandNotFound(command.to_string()))?;
        if metadata.file_type().is_symlink() {
            return Err(RunnerError::SymlinkCommand(command.to_string()));
        }
    }

    Ok(())
}

fn validate_argument(arg: &str) -> RunnerResult<()> {
    if let Some(character) = arg.chars().find(|c| DANGEROUS_CHARS.contains(c)) {
        return Err(RunnerError::DangerousArgument {
            arg: arg.to_string(),
            character,
        });
    }
    if arg.contains("..") && !arg.contains("://") {
        return Err(RunnerError::PathTraversal(arg.to_string()));
    }
    Ok(())
}

/// Prepend the interpreter for known script extensions.
fn build_argv(command: &str, args: &[String]) -> Vec<String> {
    let extension = Path::new(command)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    let mut argv: Vec<String> = match extension {
        "py" => vec!["python3".to_string()],
        "js" => vec!["node".to_string()],
        "rb" => vec!["ruby".to_string()],
        "sh" => {
            if cfg!(windows) {
                vec!["bash".to_string()]
            } else {
                vec!["sh".to_string()]
            }
        }
        "bat" => {
            if cfg!(windows) {
                vec!["cmd".to_string(), "/c".to_string()]
            } else {
                vec![]
            }
        }
        "ps1" => vec!["powershell".to_string(), "-File".to_string()],
        _ => vec![],
    };

    argv.push(command.to_string());
    argv.extend(args.iter().cloned());
    argv
}

/// Argument classifier for replacement mode: does this look like a filename?
fn is_filename_arg(arg: &str) -> bool {
    let lowered = arg.to_ascii_lowercase();
    if FILE_EXTENSIONS.iter().any(|ext| lowered.contains(ext)) {
        return true;
    }
    if FILENAME_INDICATORS.iter().any(|ind| lowered.contains(ind)) {
        return true;
    }
    (lowered.contains('/') || lowered.contains('\\'))
        && !lowered.contains("http")
        && !lowered.contains("fuzz")
        && !lowered.contains("://")
}

/// Make a value safe to embed in a filename. Idempotent.
pub fn sanitize_for_filename(value: &str) -> String {
    let stripped = match value.find("://") {
        Some(idx) => &value[idx + 3..],
        None => value,
    };

    let mut sanitized = String::with_capacity(stripped.len());
    let mut last_was_underscore = false;
    for c in stripped.chars() {
        let replaced = if matches!(
            c,
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '=' | '&' | '#'
        ) {
            '_'
        } else {
            c
        };
        if replaced == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        sanitized.push(replaced);
    }

    let clamped: String = sanitized.chars().take(100).collect();
    let trimmed = clamped.trim_matches(|c| c == '_' || c == '.');

    if trimmed.is_empty() {
        "sanitized_value".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn runner(dir: &Path) -> CommandRunner {
        CommandRunner::new(dir.to_path_buf(), HashMap::new(), false)
    }

    #[tokio::test]
    async fn test_simple_command() {
        let dir = tempfile::tempdir().unwrap();
        let output = runner(dir.path())
            .run(&CancellationToken::new(), "echo", &["hello".to_string()])
            .await
            .unwrap();
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fail.sh");
        std::fs::write(&script, "#!/bin/sh\necho boom >&2\nexit 3\n").unwrap();

        let err = runner(dir.path())
            .run(
                &CancellationToken::new(),
                script.to_str().unwrap(),
                &[],
            )
            .await
            .unwrap_err();
        match err {
            RunnerError::NonZeroExit { code, stderr } => {
                assert_eq!(code, 3);
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_dangerous_argument_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner(dir.path())
            .run(
                &CancellationToken::new(),
                "echo",
                &["hi; rm -rf /".to_string()],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dangerous character"));
    }

    #[tokio::test]
    async fn test_all_dangerous_characters_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        for c in [';', '&', '|', '`', '$', '(', ')', '<', '>', '\n'] {
            let err = r
                .run(&CancellationToken::new(), "echo", &[format!("a{c}b")])
                .await
                .unwrap_err();
            assert!(
                matches!(err, RunnerError::DangerousArgument { .. }),
                "character {c:?} was not rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_path_traversal_rejected_but_urls_exempt() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());

        let err = r
            .run(
                &CancellationToken::new(),
                "echo",
                &["../../etc/passwd".to_string()],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::PathTraversal(_)));

        r.run(
            &CancellationToken::new(),
            "echo",
            &["https://example.com/a/../b".to_string()],
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_missing_extension_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner(dir.path())
            .run(&CancellationToken::new(), "/nope/tool.py", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::CommandNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_child() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let start = std::time::Instant::now();
        let err = runner(dir.path())
            .run(&cancel, "sleep", &["30".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_dry_run_skips_execution() {
        let dir = tempfile::tempdir().unwrap();
        let r = CommandRunner::new(dir.path().to_path_buf(), HashMap::new(), true);
        // A command that would otherwise fail never launches.
        r.run(&CancellationToken::new(), "definitely-not-a-binary", &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_replacement_substitutes_and_sanitizes() {
        let dir = tempfile::tempdir().unwrap();
        let mut values = tempfile::NamedTempFile::new().unwrap();
        writeln!(values, "https://a.example.com").unwrap();
        writeln!(values, "# skipped").unwrap();
        writeln!(values).unwrap();
        writeln!(values, "https://b.example.com").unwrap();

        let marker = dir.path().join("ran.sh");
        std::fs::write(
            &marker,
            "#!/bin/sh\necho \"$1 $2\" >> invocations.txt\n",
        )
        .unwrap();

        runner(dir.path())
            .run_with_replacement(
                &CancellationToken::new(),
                marker.to_str().unwrap(),
                &["TARGET".to_string(), "TARGET_ffuf_output.json".to_string()],
                "TARGET",
                values.path(),
            )
            .await
            .unwrap();

        let log = std::fs::read_to_string(dir.path().join("invocations.txt")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        // URL arg keeps the raw value, filename arg gets the sanitised form.
        assert_eq!(lines[0], "https://a.example.com a.example.com_ffuf_output.json");
        assert_eq!(lines[1], "https://b.example.com b.example.com_ffuf_output.json");
    }

    #[test]
    fn test_interpreter_selection() {
        assert_eq!(build_argv("tool.py", &[])[0], "python3");
        assert_eq!(build_argv("tool.js", &[])[0], "node");
        assert_eq!(build_argv("tool.rb", &[])[0], "ruby");
        assert_eq!(build_argv("tool.ps1", &[])[0], "powershell");
        #[cfg(unix)]
        assert_eq!(build_argv("tool.sh", &[])[0], "sh");
        // Unknown extensions execute as-is.
        assert_eq!(build_argv("tool.xyz", &[])[0], "tool.xyz");
        assert_eq!(build_argv("nmap", &[])[0], "nmap");
    }

    #[test]
    fn test_filename_classification() {
        assert!(is_filename_arg("ffuf_output.json"));
        assert!(is_filename_arg("scan_report"));
        assert!(is_filename_arg("path/to/thing"));
        assert!(!is_filename_arg("https://example.com/FUZZ"));
        assert!(!is_filename_arg("-silent"));
    }

    #[test]
    fn test_sanitize_for_filename() {
        assert_eq!(sanitize_for_filename("https://a.example.com"), "a.example.com");
        assert_eq!(sanitize_for_filename("a<b>c:d"), "a_b_c_d");
        assert_eq!(sanitize_for_filename("a///b"), "a_b");
        assert_eq!(sanitize_for_filename("___"), "sanitized_value");
        assert_eq!(sanitize_for_filename(""), "sanitized_value");
        assert!(sanitize_for_filename(&"x".repeat(500)).len() <= 100);
    }
}
