//! Service runners
//!
//! A runner supervises one service: a host process, a single container, or a
//! compose-managed container. Whatever started a service hands the
//! orchestrator a [`ServiceHandle`], an opaque stop-token that carries just
//! enough identity to be persisted and recovered across CLI invocations.

pub mod compose;
pub mod container;
pub mod process;

use crate::Result;
use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Which mechanism supervises a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// Host process supervised directly
    Process,
    /// Single container started with `docker run`
    Container,
    /// Container managed by the compose project
    Compose,
}

enum Stopper {
    /// A live process runner owned by this handle
    Process(process::ProcessRunner),
    /// A live container runner owned by this handle
    Container(container::ContainerRunner),
    /// Compose-managed; `compose down` is responsible for teardown
    Passive,
    /// Recovered from the state file: a pid we no longer parent
    DetachedProcess {
        /// Recorded pid
        pid: u32,
    },
    /// Recovered from the state file: a named container
    DetachedContainer {
        /// Deterministic container name
        container_name: String,
    },
    /// Already stopped; further stops are no-ops
    Stopped,
}

/// An opaque stop-token for one running service
pub struct ServiceHandle {
    service_name: String,
    kind: RunnerKind,
    pid: Option<u32>,
    container_id: Option<String>,
    running: Arc<AtomicBool>,
    stopper: Mutex<Stopper>,
}

impl ServiceHandle {
    /// Wrap a live process runner
    pub fn from_process(runner: process::ProcessRunner) -> Self {
        Self {
            service_name: runner.service_name().to_string(),
            kind: RunnerKind::Process,
            pid: Some(runner.pid()),
            container_id: None,
            running: runner.running_flag(),
            stopper: Mutex::new(Stopper::Process(runner)),
        }
    }

    /// Wrap a live container runner
    pub fn from_container(runner: container::ContainerRunner) -> Self {
        Self {
            service_name: runner.service_name().to_string(),
            kind: RunnerKind::Container,
            pid: None,
            container_id: Some(runner.container_id().to_string()),
            running: Arc::new(AtomicBool::new(true)),
            stopper: Mutex::new(Stopper::Container(runner)),
        }
    }

    /// A passive handle for a compose-managed service; `stop` is a no-op
    pub fn compose(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            kind: RunnerKind::Compose,
            pid: None,
            container_id: None,
            running: Arc::new(AtomicBool::new(true)),
            stopper: Mutex::new(Stopper::Passive),
        }
    }

    /// Rehydrate a process handle from persisted state
    pub fn detached_process(service_name: impl Into<String>, pid: u32) -> Self {
        Self {
            service_name: service_name.into(),
            kind: RunnerKind::Process,
            pid: Some(pid),
            container_id: None,
            running: Arc::new(AtomicBool::new(true)),
            stopper: Mutex::new(Stopper::DetachedProcess { pid }),
        }
    }

    /// Rehydrate a container handle from persisted state
    pub fn detached_container(
        service_name: impl Into<String>,
        container_name: impl Into<String>,
        container_id: Option<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            kind: RunnerKind::Container,
            pid: None,
            container_id,
            running: Arc::new(AtomicBool::new(true)),
            stopper: Mutex::new(Stopper::DetachedContainer {
                container_name: container_name.into(),
            }),
        }
    }

    /// The supervised service's name
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The supervising mechanism
    pub fn kind(&self) -> RunnerKind {
        self.kind
    }

    /// Recorded pid, for process runners
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Recorded container id, for container runners
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Whether the service is believed to still be running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the service. Idempotent; `timeout` falls back to the runner's
    /// own default (5s for processes, 10s for containers).
    pub async fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        let mut stopper = self.stopper.lock().await;
        let previous = std::mem::replace(&mut *stopper, Stopper::Stopped);
        // The flag flips before the actual teardown so a concurrent observer
        // never sees a handle that is both "running" and mid-stop.
        self.running.store(false, Ordering::SeqCst);

        match previous {
            Stopper::Process(runner) => {
                runner
                    .stop(timeout.unwrap_or(process::DEFAULT_STOP_TIMEOUT))
                    .await?;
            }
            Stopper::Container(runner) => {
                runner
                    .stop(timeout.unwrap_or(container::DEFAULT_STOP_TIMEOUT))
                    .await?;
            }
            Stopper::Passive | Stopper::Stopped => {
                debug!(service = %self.service_name, "stop is a no-op for this handle");
            }
            Stopper::DetachedProcess { pid } => {
                process::stop_detached(pid, timeout.unwrap_or(process::DEFAULT_STOP_TIMEOUT))
                    .await?;
            }
            Stopper::DetachedContainer { container_name } => {
                container::stop_named(
                    &container_name,
                    timeout.unwrap_or(container::DEFAULT_STOP_TIMEOUT),
                )
                .await?;
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service_name", &self.service_name)
            .field("kind", &self.kind)
            .field("pid", &self.pid)
            .field("container_id", &self.container_id)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_compose_handle_stop_is_noop() {
        let handle = ServiceHandle::compose("db");
        assert_eq!(handle.kind(), RunnerKind::Compose);
        assert!(handle.is_running());

        handle.stop(None).await.unwrap();
        assert!(!handle.is_running());

        // Stopping twice is fine.
        handle.stop(None).await.unwrap();
    }

    #[test]
    fn test_runner_kind_serialization() {
        assert_eq!(serde_json::to_string(&RunnerKind::Process).unwrap(), "\"process\"");
        assert_eq!(
            serde_json::from_str::<RunnerKind>("\"compose\"").unwrap(),
            RunnerKind::Compose
        );
    }
}
