//! Compose runner
//!
//! Drives the local compose tool: `up --build`, readiness polling over
//! `ps --format json`, log following with per-service attribution, and
//! `down`. Readiness deliberately avoids `up --wait` so init tasks (services
//! that must exit 0) can gate later phases.

use crate::cancel::CancelToken;
use crate::events::{EventBus, OutputLine};
use crate::{Error, Result};
use command_runner::{Command, CommandRunner, OutputStream, ProcessEvent};
use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default interval between readiness polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default overall readiness timeout
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// How many trailing stderr lines are kept for error reporting
const STDERR_TAIL: usize = 20;

/// Service name used when attributing the compose tool's own output
const COMPOSE_OUTPUT_SERVICE: &str = "compose";

fn log_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\S+)\s+\|\s?(.*)$").unwrap())
}

/// One entry from `compose ps --format json`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PsEntry {
    /// Container name
    #[serde(default, rename = "Name")]
    pub name: String,
    /// Compose service name
    #[serde(default, rename = "Service")]
    pub service: String,
    /// Container state: `running`, `exited`, `created`, ...
    #[serde(default, rename = "State")]
    pub state: String,
    /// Health: empty, `starting`, `healthy`, `unhealthy`
    #[serde(default, rename = "Health")]
    pub health: String,
    /// Exit code, meaningful when `State` is `exited`
    #[serde(default, rename = "ExitCode")]
    pub exit_code: i64,
}

/// Options for a readiness wait
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Compose services that must become ready
    pub services: Vec<String>,
    /// Subset that must run to completion (exit 0) instead of staying up
    pub wait_for_exit: BTreeSet<String>,
    /// Interval between `ps` polls
    pub poll_interval: Duration,
    /// Overall deadline
    pub timeout: Duration,
}

impl WaitOptions {
    /// Options with the default poll interval and timeout
    pub fn new(services: Vec<String>, wait_for_exit: BTreeSet<String>) -> Self {
        Self {
            services,
            wait_for_exit,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// A running `logs -f` follower
pub struct LogsFollower {
    handle: command_runner::ProcessHandle,
    pump: smol::Task<()>,
}

impl std::fmt::Debug for LogsFollower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogsFollower").finish()
    }
}

impl LogsFollower {
    /// Kill the follower process and its pump task
    pub async fn kill(mut self) {
        let _ = self.handle.kill();
        self.pump.cancel().await;
    }
}

/// Invokes the compose tool for one project
#[derive(Debug, Clone)]
pub struct ComposeRunner {
    runner: CommandRunner,
    /// Compose project name (`-p`)
    pub project_name: String,
    /// Ordered `-f` file list
    pub file_args: Vec<PathBuf>,
    /// Working directory for every invocation
    pub cwd: PathBuf,
}

impl ComposeRunner {
    /// Create a runner for one compose project
    pub fn new(project_name: impl Into<String>, file_args: Vec<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            runner: CommandRunner::new("compose-runner"),
            project_name: project_name.into(),
            file_args,
            cwd: cwd.into(),
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.args(["compose", "--progress", "plain", "--project-directory", "."]);
        cmd.args(["-p", &self.project_name]);
        for file in &self.file_args {
            cmd.arg("-f");
            cmd.arg(file);
        }
        cmd.current_dir(&self.cwd);
        cmd
    }

    /// `up -d --build` for the given services (all services when empty),
    /// streaming tool output onto the event bus. Cancellation terminates the
    /// child.
    pub async fn up(
        &self,
        services: &[String],
        cancel: &CancelToken,
        events: &EventBus,
    ) -> Result<()> {
        info!(project = %self.project_name, ?services, "compose up");

        let mut cmd = self.base_command();
        cmd.args(["up", "-d", "--build"]);
        cmd.args(services);

        let (stream, mut handle) = self.runner.spawn(cmd).await.map_err(|e| Error::ComposeExec {
            message: format!("failed to spawn compose up: {}", e),
        })?;

        let stderr_tail: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let pump = {
            let events = events.clone();
            let stderr_tail = stderr_tail.clone();
            smol::spawn(async move {
                let mut stream = stream;
                while let Some(event) = stream.next().await {
                    if let ProcessEvent::Output(chunk) = event {
                        if chunk.stream == OutputStream::Stderr {
                            let mut tail = stderr_tail.lock().unwrap();
                            if tail.len() == STDERR_TAIL {
                                tail.remove(0);
                            }
                            tail.push(chunk.text.clone());
                        }
                        events.output(OutputLine::from_chunk(COMPOSE_OUTPUT_SERVICE, chunk));
                    }
                }
            })
        };

        let status = smol::future::or(
            async { Some(handle.wait().await) },
            async {
                cancel.cancelled().await;
                None
            },
        )
        .await;

        match status {
            Some(status) => {
                pump.await;
                let status = status.map_err(|e| Error::ComposeExec {
                    message: format!("compose up failed: {}", e),
                })?;
                if !status.success() {
                    let tail = stderr_tail.lock().unwrap().join("\n");
                    return Err(Error::ComposeExec {
                        message: format!(
                            "compose up exited with code {:?}: {}",
                            status.code, tail
                        ),
                    });
                }
                Ok(())
            }
            None => {
                warn!(project = %self.project_name, "compose up cancelled, terminating child");
                let _ = handle.stop(Duration::from_secs(5)).await;
                pump.cancel().await;
                Err(Error::orchestrator("compose up aborted by cancellation"))
            }
        }
    }

    /// Poll `ps` until every target service is ready (see [`WaitOptions`]),
    /// failing fast on unhealthy or non-zero-exited services.
    pub async fn wait(&self, opts: WaitOptions, cancel: &CancelToken) -> Result<()> {
        info!(project = %self.project_name, services = ?opts.services, "waiting for services");
        let started = Instant::now();

        loop {
            cancel.check("compose wait")?;

            let entries = self.ps().await?;
            match evaluate_wait(&entries, &opts.services, &opts.wait_for_exit) {
                WaitEval::Ready => {
                    debug!(project = %self.project_name, "all services ready");
                    return Ok(());
                }
                WaitEval::Failed(message) => {
                    return Err(Error::ComposeExec { message });
                }
                WaitEval::Pending(pending) => {
                    if started.elapsed() >= opts.timeout {
                        return Err(Error::ComposeExec {
                            message: format!(
                                "timed out after {:?} waiting for services: {}",
                                opts.timeout,
                                pending.join(", ")
                            ),
                        });
                    }
                    debug!(pending = ?pending, "services not ready yet");
                }
            }

            smol::future::or(
                async {
                    smol::Timer::after(opts.poll_interval).await;
                },
                cancel.cancelled(),
            )
            .await;
        }
    }

    /// `ps -a --format json`, parsed from NDJSON
    pub async fn ps(&self) -> Result<Vec<PsEntry>> {
        let mut cmd = self.base_command();
        cmd.args(["ps", "-a", "--format", "json"]);

        let result = self.runner.execute(cmd).await.map_err(|e| Error::ComposeExec {
            message: format!("failed to run compose ps: {}", e),
        })?;
        if !result.success() {
            return Err(Error::ComposeExec {
                message: format!("compose ps failed: {}", result.stderr.trim()),
            });
        }

        Ok(parse_ps_output(&result.stdout))
    }

    /// `logs -f --no-color --since 0s`, each line split into service and
    /// text and emitted on the event bus. Replica suffixes (`api-1`) are
    /// stripped from the service name.
    pub async fn logs(&self, events: &EventBus) -> Result<LogsFollower> {
        let mut cmd = self.base_command();
        cmd.args(["logs", "-f", "--no-color", "--since", "0s"]);

        let (stream, handle) = self.runner.spawn(cmd).await.map_err(|e| Error::ComposeExec {
            message: format!("failed to spawn compose logs: {}", e),
        })?;

        let pump = {
            let events = events.clone();
            smol::spawn(async move {
                let mut stream = stream;
                while let Some(event) = stream.next().await {
                    if let ProcessEvent::Output(chunk) = event {
                        if let Some((service, text)) = split_log_line(&chunk.text) {
                            events.output(OutputLine {
                                service,
                                stream: chunk.stream,
                                text,
                                timestamp: chunk.timestamp,
                            });
                        }
                    }
                }
            })
        };

        Ok(LogsFollower { handle, pump })
    }

    /// `down`, with `-v --remove-orphans` when `clean`. Idempotent.
    pub async fn down(&self, clean: bool) -> Result<()> {
        info!(project = %self.project_name, clean, "compose down");

        let mut cmd = self.base_command();
        cmd.arg("down");
        if clean {
            cmd.args(["-v", "--remove-orphans"]);
        }

        let result = self.runner.execute(cmd).await.map_err(|e| Error::ComposeExec {
            message: format!("failed to run compose down: {}", e),
        })?;
        if !result.success() {
            return Err(Error::ComposeExec {
                message: format!("compose down failed: {}", result.stderr.trim()),
            });
        }
        Ok(())
    }
}

/// Outcome of one readiness evaluation
#[derive(Debug, Clone, PartialEq)]
enum WaitEval {
    /// Every target service is ready
    Ready,
    /// These services are not ready yet
    Pending(Vec<String>),
    /// A service failed terminally
    Failed(String),
}

/// Evaluate readiness of the target services against a `ps` snapshot.
///
/// A service outside `wait_for_exit` is ready when running and not
/// unhealthy, or exited 0. A service in `wait_for_exit` (an init task) is
/// ready only once it has exited 0; while running it is still pending.
/// Unhealthy state or a non-zero exit code fails the wait immediately.
fn evaluate_wait(
    entries: &[PsEntry],
    services: &[String],
    wait_for_exit: &BTreeSet<String>,
) -> WaitEval {
    let mut pending = Vec::new();

    for service in services {
        let Some(entry) = entries.iter().find(|e| &e.service == service) else {
            pending.push(service.clone());
            continue;
        };

        if entry.state == "exited" {
            if entry.exit_code == 0 {
                continue;
            }
            return WaitEval::Failed(format!(
                "service '{}' exited with code {}",
                service, entry.exit_code
            ));
        }

        if entry.health == "unhealthy" {
            return WaitEval::Failed(format!("service '{}' is unhealthy", service));
        }

        if wait_for_exit.contains(service) {
            // Init tasks count as ready only once they have exited.
            pending.push(service.clone());
            continue;
        }

        if entry.state == "running" && (entry.health.is_empty() || entry.health == "healthy") {
            continue;
        }

        pending.push(service.clone());
    }

    if pending.is_empty() {
        WaitEval::Ready
    } else {
        WaitEval::Pending(pending)
    }
}

fn parse_ps_output(stdout: &str) -> Vec<PsEntry> {
    let mut entries = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<PsEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => debug!("skipping unparseable ps line: {}", e),
        }
    }
    entries
}

/// Split a `service-1  | text` log line, stripping the replica suffix.
fn split_log_line(line: &str) -> Option<(String, String)> {
    let captures = log_line_re().captures(line)?;
    let raw_service = captures.get(1)?.as_str();
    let text = captures.get(2)?.as_str().to_string();

    let service = match raw_service.rsplit_once('-') {
        Some((base, suffix))
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) =>
        {
            base.to_string()
        }
        _ => raw_service.to_string(),
    };

    Some((service, text))
}
