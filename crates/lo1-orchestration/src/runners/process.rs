//! Host-process runner
//!
//! Spawns a service command through the platform shell, pumps its output
//! onto the event bus, and stops it with the graceful-then-forced protocol.

use crate::events::{EventBus, OutputLine};
use crate::{Error, Result};
use command_runner::{Command, CommandRunner, ProcessEvent};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default graceful-stop window for host processes
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// What to spawn
#[derive(Debug, Clone)]
pub struct ProcessSpawn {
    /// The service being supervised
    pub service_name: String,
    /// Shell command line
    pub command: String,
    /// Working directory
    pub cwd: PathBuf,
    /// Environment layered over the ambient environment
    pub env: BTreeMap<String, String>,
}

/// A supervised host process
pub struct ProcessRunner {
    service_name: String,
    pid: u32,
    handle: command_runner::ProcessHandle,
    pump: smol::Task<()>,
    running: Arc<AtomicBool>,
}

/// Spawn a service command and start pumping its output
pub async fn start(spawn: ProcessSpawn, events: &EventBus) -> Result<ProcessRunner> {
    info!(service = %spawn.service_name, "starting process: {}", spawn.command);

    let mut cmd = Command::shell(&spawn.command);
    cmd.current_dir(&spawn.cwd);
    cmd.envs(&spawn.env);

    let runner = CommandRunner::new("process-runner");
    let (stream, handle) = runner.spawn(cmd).await.map_err(|e| Error::ProcessRunner {
        service: spawn.service_name.clone(),
        message: e.to_string(),
    })?;

    let pid = handle.pid();
    debug!(service = %spawn.service_name, pid, "process spawned");

    let running = Arc::new(AtomicBool::new(true));
    let pump = {
        let events = events.clone();
        let service = spawn.service_name.clone();
        let running = running.clone();
        smol::spawn(async move {
            let mut stream = stream;
            while let Some(event) = stream.next().await {
                if let ProcessEvent::Output(chunk) = event {
                    events.output(OutputLine::from_chunk(service.clone(), chunk));
                }
            }
            // Both pipes closed: the process is gone.
            running.store(false, Ordering::SeqCst);
        })
    };

    Ok(ProcessRunner {
        service_name: spawn.service_name,
        pid,
        handle,
        pump,
        running,
    })
}

impl ProcessRunner {
    /// The supervised service's name
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Pid of the spawned shell
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Shared liveness flag, flipped when the output pipes close
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Stop the process: SIGTERM, wait up to `timeout`, then SIGKILL.
    /// Remaining buffered output is flushed before this returns.
    pub async fn stop(mut self, timeout: Duration) -> Result<()> {
        info!(service = %self.service_name, pid = self.pid, "stopping process");

        let status = self
            .handle
            .stop(timeout)
            .await
            .map_err(|e| Error::ProcessRunner {
                service: self.service_name.clone(),
                message: e.to_string(),
            })?;

        // The pump completes once the pipes close; awaiting it drains the
        // tail of the output.
        self.pump.await;
        self.running.store(false, Ordering::SeqCst);

        debug!(service = %self.service_name, code = ?status.code, "process stopped");
        Ok(())
    }
}

/// Stop a process recovered from the state file. We are not its parent, so
/// exit is observed by polling signal delivery rather than `wait`.
pub async fn stop_detached(pid: u32, timeout: Duration) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let target = Pid::from_raw(pid as i32);
        if kill(target, Signal::SIGTERM).is_err() {
            // Already gone.
            return Ok(());
        }

        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            smol::Timer::after(Duration::from_millis(200)).await;
            if kill(target, None).is_err() {
                return Ok(());
            }
        }

        warn!(pid, "detached process did not exit within {:?}, sending SIGKILL", timeout);
        let _ = kill(target, Signal::SIGKILL);
    }

    #[cfg(not(unix))]
    {
        let _ = (pid, timeout);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OrchestratorEvent;

    fn spawn_spec(command: &str) -> ProcessSpawn {
        ProcessSpawn {
            service_name: "test".to_string(),
            command: command.to_string(),
            cwd: std::env::temp_dir(),
            env: BTreeMap::new(),
        }
    }

    #[smol_potat::test]
    async fn test_start_and_stream_output() {
        let (events, rx) = EventBus::new();
        let runner = start(spawn_spec("echo from-service"), &events).await.unwrap();
        assert!(runner.pid() > 0);

        // Wait for the short-lived process to finish and flush.
        smol::Timer::after(Duration::from_millis(300)).await;

        let mut lines = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let OrchestratorEvent::Output { line } = event {
                assert_eq!(line.service, "test");
                lines.push(line.text);
            }
        }
        assert_eq!(lines, vec!["from-service"]);

        runner.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[smol_potat::test]
    async fn test_running_flag_clears_on_exit() {
        let (events, _rx) = EventBus::new();
        let runner = start(spawn_spec("true"), &events).await.unwrap();
        let flag = runner.running_flag();

        smol::Timer::after(Duration::from_millis(300)).await;
        assert!(!flag.load(Ordering::SeqCst));

        runner.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[smol_potat::test]
    async fn test_stop_long_running_process() {
        let (events, _rx) = EventBus::new();
        let runner = start(spawn_spec("sleep 30"), &events).await.unwrap();
        let flag = runner.running_flag();

        runner.stop(Duration::from_secs(2)).await.unwrap();
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[smol_potat::test]
    async fn test_env_reaches_child() {
        let (events, rx) = EventBus::new();
        let mut spec = spawn_spec("echo $LO1_TEST_VALUE");
        spec.env
            .insert("LO1_TEST_VALUE".to_string(), "injected".to_string());

        let runner = start(spec, &events).await.unwrap();
        smol::Timer::after(Duration::from_millis(300)).await;

        let mut saw = false;
        while let Ok(event) = rx.try_recv() {
            if let OrchestratorEvent::Output { line } = event {
                if line.text == "injected" {
                    saw = true;
                }
            }
        }
        assert!(saw);

        runner.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[smol_potat::test]
    async fn test_stop_detached_missing_pid_is_ok() {
        // Pid 0x7fffffff is almost certainly unused.
        stop_detached(0x7fff_ffff, Duration::from_millis(100))
            .await
            .unwrap();
    }
}
