//! Process handle with the graceful-then-forced stop protocol

use crate::error::{Error, Result};
use async_process::Child;
use std::time::Duration;

/// Exit status of a finished process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process, if any (Unix only)
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Whether the process exited with code zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[cfg(unix)]
fn convert_status(status: std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus {
        code: status.code(),
        signal: status.signal(),
    }
}

#[cfg(not(unix))]
fn convert_status(status: std::process::ExitStatus) -> ExitStatus {
    ExitStatus {
        code: status.code(),
        signal: None,
    }
}

/// A handle to control a spawned process.
///
/// The underlying child is force-killed on drop so an abandoned handle never
/// leaks a running process.
pub struct ProcessHandle {
    child: Child,
    kill_on_drop: bool,
}

impl ProcessHandle {
    pub(crate) fn new(child: Child) -> Self {
        Self {
            child,
            kill_on_drop: true,
        }
    }

    /// The process id of the child
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self
            .child
            .status()
            .await
            .map_err(|e| Error::spawn_failed(format!("failed to wait for process: {}", e)))?;
        self.kill_on_drop = false;
        Ok(convert_status(status))
    }

    /// Send a graceful termination signal (SIGTERM on Unix)
    pub fn terminate(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            signal::kill(pid, Signal::SIGTERM)
                .map_err(|e| Error::signal_failed(15, e.to_string()))?;
        }

        #[cfg(not(unix))]
        {
            self.child
                .kill()
                .map_err(|e| Error::signal_failed(-1, e.to_string()))?;
        }

        Ok(())
    }

    /// Send a non-ignorable kill (SIGKILL on Unix)
    pub fn kill(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            signal::kill(pid, Signal::SIGKILL)
                .map_err(|e| Error::signal_failed(9, e.to_string()))?;
        }

        #[cfg(not(unix))]
        {
            self.child
                .kill()
                .map_err(|e| Error::signal_failed(-1, e.to_string()))?;
        }

        Ok(())
    }

    /// Stop the process: terminate, wait up to `timeout`, then kill.
    ///
    /// Returns the exit status observed after the process is gone. If the
    /// graceful signal cannot be delivered (the process already exited) the
    /// wait still resolves normally.
    pub async fn stop(&mut self, timeout: Duration) -> Result<ExitStatus> {
        let _ = self.terminate();

        let graceful = {
            let wait = self.child.status();
            futures::pin_mut!(wait);
            smol::future::or(async { Some(wait.await) }, async {
                smol::Timer::after(timeout).await;
                None
            })
            .await
        };

        if let Some(status) = graceful {
            self.kill_on_drop = false;
            let status = status
                .map_err(|e| Error::spawn_failed(format!("failed to wait for process: {}", e)))?;
            return Ok(convert_status(status));
        }

        tracing::warn!(
            pid = self.child.id(),
            "process did not exit within {:?}, sending SIGKILL",
            timeout
        );
        let _ = self.kill();
        self.wait().await
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.kill_on_drop {
            // Synchronous best-effort kill; the process may already be gone.
            let _ = self.child.kill();
        }
    }
}
