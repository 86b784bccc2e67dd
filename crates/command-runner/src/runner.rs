//! Spawning and captured execution of commands

use crate::command::Command;
use crate::error::{Error, Result};
use crate::event::{OutputChunk, OutputStream, ProcessEvent};
use crate::process::{ExitStatus, ProcessHandle};
use async_process::Stdio;
use futures::stream::Stream;
use futures_lite::io::{BufReader, Lines};
use futures_lite::AsyncBufReadExt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

/// Result of a captured command execution
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit status of the command
    pub status: ExitStatus,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ExecResult {
    /// Whether the command exited with code zero
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Executes commands, either streaming their output or capturing it.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    name: String,
}

impl CommandRunner {
    /// Create a runner; the name shows up in trace output only
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Spawn a command with piped output, returning the line-buffered event
    /// stream and a handle to control the process.
    pub async fn spawn(&self, command: Command) -> Result<(ProcessEventStream, ProcessHandle)> {
        debug!(runner = %self.name, "spawning: {}", command.display());

        let mut cmd = command.prepare();
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn_failed(format!("failed to spawn process: {}", e)))?;

        let child_id = child.id();
        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        let events = ProcessEventStream {
            stdout,
            stderr,
            started_sent: false,
            child_id,
        };

        Ok((events, ProcessHandle::new(child)))
    }

    /// Run a command to completion, capturing stdout and stderr.
    pub async fn execute(&self, command: Command) -> Result<ExecResult> {
        debug!(runner = %self.name, "executing: {}", command.display());

        let output = command
            .prepare()
            .output()
            .await
            .map_err(|e| Error::spawn_failed(format!("failed to run command: {}", e)))?;

        let status = {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                ExitStatus {
                    code: output.status.code(),
                    signal: output.status.signal(),
                }
            }
            #[cfg(not(unix))]
            {
                ExitStatus {
                    code: output.status.code(),
                    signal: None,
                }
            }
        };

        Ok(ExecResult {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Stream of events from a spawned process.
///
/// Interleaves stdout and stderr lines as they become available and ends when
/// both pipes are closed. Exit status is obtained from the handle, not the
/// stream.
pub struct ProcessEventStream {
    stdout: Option<Lines<BufReader<async_process::ChildStdout>>>,
    stderr: Option<Lines<BufReader<async_process::ChildStderr>>>,
    started_sent: bool,
    child_id: u32,
}

impl Stream for ProcessEventStream {
    type Item = ProcessEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.started_sent {
            self.started_sent = true;
            return Poll::Ready(Some(ProcessEvent::Started { pid: self.child_id }));
        }

        if let Some(stdout) = &mut self.stdout {
            match Pin::new(stdout).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    let chunk = OutputChunk::new(OutputStream::Stdout, line);
                    return Poll::Ready(Some(ProcessEvent::Output(chunk)));
                }
                Poll::Ready(Some(Err(_))) | Poll::Ready(None) => {
                    self.stdout = None;
                }
                Poll::Pending => {}
            }
        }

        if let Some(stderr) = &mut self.stderr {
            match Pin::new(stderr).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    let chunk = OutputChunk::new(OutputStream::Stderr, line);
                    return Poll::Ready(Some(ProcessEvent::Output(chunk)));
                }
                Poll::Ready(Some(Err(_))) | Poll::Ready(None) => {
                    self.stderr = None;
                }
                Poll::Pending => {}
            }
        }

        if self.stdout.is_none() && self.stderr.is_none() {
            return Poll::Ready(None);
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[smol_potat::test]
    async fn test_execute_captures_output() {
        let runner = CommandRunner::new("test");
        let mut cmd = Command::new("echo");
        cmd.arg("hello world");

        let result = runner.execute(cmd).await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello world");
    }

    #[smol_potat::test]
    async fn test_execute_nonzero_exit() {
        let runner = CommandRunner::new("test");
        let result = runner.execute(Command::shell("exit 3")).await.unwrap();
        assert!(!result.success());
        assert_eq!(result.status.code, Some(3));
    }

    #[smol_potat::test]
    async fn test_spawn_streams_lines() {
        let runner = CommandRunner::new("test");
        let cmd = Command::shell("echo one; echo two >&2");

        let (mut events, mut handle) = runner.spawn(cmd).await.unwrap();

        let mut stdout_lines = Vec::new();
        let mut stderr_lines = Vec::new();
        while let Some(event) = events.next().await {
            match event {
                ProcessEvent::Started { pid } => assert!(pid > 0),
                ProcessEvent::Output(chunk) => match chunk.stream {
                    OutputStream::Stdout => stdout_lines.push(chunk.text),
                    OutputStream::Stderr => stderr_lines.push(chunk.text),
                },
            }
        }

        let status = handle.wait().await.unwrap();
        assert!(status.success());
        assert_eq!(stdout_lines, vec!["one"]);
        assert_eq!(stderr_lines, vec!["two"]);
    }

    #[smol_potat::test]
    async fn test_stop_terminates_gracefully() {
        let runner = CommandRunner::new("test");
        let (_events, mut handle) = runner.spawn(Command::shell("sleep 30")).await.unwrap();

        let status = handle.stop(Duration::from_secs(2)).await.unwrap();
        // Killed by SIGTERM, so no exit code on Unix.
        assert!(!status.success());
    }

    #[smol_potat::test]
    async fn test_spawn_missing_binary_fails() {
        let runner = CommandRunner::new("test");
        let result = runner
            .spawn(Command::new("definitely-not-a-real-binary-xyz"))
            .await;
        assert!(matches!(result, Err(Error::SpawnFailed { .. })));
    }
}
