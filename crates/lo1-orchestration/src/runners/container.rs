//! Single-container runner
//!
//! Launches one named container with `docker run -d`, follows its logs with
//! a `docker logs -f` child, and stops it with `docker stop` + `docker rm`,
//! both tolerant of already-stopped or already-removed state.

use crate::events::{EventBus, OutputLine};
use crate::names;
use crate::{Error, Result};
use command_runner::{Command, CommandRunner, ProcessEvent};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default graceful-stop window for containers
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Container launch configuration, typically supplied by a plugin
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Image to run
    pub image: String,
    /// Command override, if any
    pub cmd: Vec<String>,
    /// Environment baked into the container
    pub env: BTreeMap<String, String>,
    /// Bind mounts, `host:container` form
    pub binds: Vec<String>,
    /// Working directory inside the container
    pub working_dir: Option<String>,
}

/// What to launch
#[derive(Debug, Clone)]
pub struct ContainerStart {
    /// Workspace the container belongs to
    pub workspace_name: String,
    /// The service being supervised
    pub service_name: String,
    /// Launch configuration
    pub spec: ContainerSpec,
    /// Network to attach to
    pub network: String,
    /// Extra environment layered over the spec's env (wins on conflict)
    pub env: BTreeMap<String, String>,
}

/// A supervised container plus its log follower
pub struct ContainerRunner {
    service_name: String,
    container_name: String,
    container_id: String,
    follower: command_runner::ProcessHandle,
    pump: smol::Task<()>,
}

/// Launch a container and start following its logs
pub async fn start(opts: ContainerStart, events: &EventBus) -> Result<ContainerRunner> {
    let container_name = names::container_name(&opts.workspace_name, &opts.service_name);
    info!(
        service = %opts.service_name,
        container = %container_name,
        image = %opts.spec.image,
        "starting container"
    );

    let runner = CommandRunner::new("container-runner");

    let mut cmd = Command::new("docker");
    cmd.args(["run", "-d", "--name", &container_name, "--network", &opts.network]);
    for bind in &opts.spec.binds {
        cmd.args(["-v", bind]);
    }
    if let Some(working_dir) = &opts.spec.working_dir {
        cmd.args(["-w", working_dir]);
    }
    let mut env = opts.spec.env.clone();
    env.extend(opts.env.clone());
    for (key, value) in &env {
        cmd.args(["-e", &format!("{}={}", key, value)]);
    }
    cmd.arg(&opts.spec.image);
    cmd.args(&opts.spec.cmd);

    let result = runner.execute(cmd).await.map_err(|e| Error::ContainerRunner {
        service: opts.service_name.clone(),
        message: e.to_string(),
    })?;
    if !result.success() {
        return Err(Error::ContainerRunner {
            service: opts.service_name.clone(),
            message: format!("docker run failed: {}", result.stderr.trim()),
        });
    }

    let container_id = result.stdout.trim().to_string();
    debug!(service = %opts.service_name, container_id = %container_id, "container started");

    let mut logs_cmd = Command::new("docker");
    logs_cmd.args(["logs", "-f", &container_id]);
    let (stream, follower) = runner.spawn(logs_cmd).await.map_err(|e| Error::ContainerRunner {
        service: opts.service_name.clone(),
        message: format!("failed to follow logs: {}", e),
    })?;

    let pump = {
        let events = events.clone();
        let service = opts.service_name.clone();
        smol::spawn(async move {
            let mut stream = stream;
            while let Some(event) = stream.next().await {
                if let ProcessEvent::Output(chunk) = event {
                    events.output(OutputLine::from_chunk(service.clone(), chunk));
                }
            }
        })
    };

    Ok(ContainerRunner {
        service_name: opts.service_name,
        container_name,
        container_id,
        follower,
        pump,
    })
}

impl ContainerRunner {
    /// The supervised service's name
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The deterministic container name
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// The container id reported by `docker run`
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Stop and remove the container, then kill the log follower
    pub async fn stop(mut self, timeout: Duration) -> Result<()> {
        info!(service = %self.service_name, container = %self.container_name, "stopping container");

        stop_named(&self.container_name, timeout).await?;

        let _ = self.follower.kill();
        self.pump.cancel().await;
        Ok(())
    }
}

/// Stop and remove a container by name, tolerating absent or
/// already-stopped state.
pub async fn stop_named(container_name: &str, timeout: Duration) -> Result<()> {
    let runner = CommandRunner::new("container-runner");
    let grace_secs = timeout.as_secs_f64().ceil() as u64;

    let mut stop_cmd = Command::new("docker");
    stop_cmd.args(["stop", "-t", &grace_secs.to_string(), container_name]);
    match runner.execute(stop_cmd).await {
        Ok(result) if !result.success() => {
            debug!(container = %container_name, "docker stop: {}", result.stderr.trim());
        }
        Ok(_) => {}
        Err(e) => {
            return Err(Error::ContainerRunner {
                service: container_name.to_string(),
                message: e.to_string(),
            });
        }
    }

    let mut rm_cmd = Command::new("docker");
    rm_cmd.args(["rm", container_name]);
    match runner.execute(rm_cmd).await {
        Ok(result) if !result.success() => {
            debug!(container = %container_name, "docker rm: {}", result.stderr.trim());
        }
        Ok(_) => {}
        Err(e) => {
            warn!(container = %container_name, "docker rm failed to run: {}", e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_env_is_overridden_by_start_env() {
        let mut spec_env = BTreeMap::new();
        spec_env.insert("A".to_string(), "spec".to_string());
        spec_env.insert("B".to_string(), "spec".to_string());

        let mut start_env = BTreeMap::new();
        start_env.insert("B".to_string(), "start".to_string());

        let mut merged = spec_env;
        merged.extend(start_env);
        assert_eq!(merged["A"], "spec");
        assert_eq!(merged["B"], "start");
    }

    #[test]
    fn test_grace_seconds_round_up() {
        let timeout = Duration::from_millis(10_500);
        assert_eq!(timeout.as_secs_f64().ceil() as u64, 11);
    }
}
