//! Service starter
//!
//! Selects the runner for one service, builds its environment, and wraps
//! the pre/post hooks and the readiness probe around the runner spawn,
//! returning the opaque [`ServiceHandle`] the orchestrator keeps.

use crate::cancel::CancelToken;
use crate::endpoints::{self, ConsumerMode, EndpointRegistry};
use crate::events::{EventBus, ServiceStatus};
use crate::hooks;
use crate::names;
use crate::plugins::{Plugin, PluginContext};
use crate::readiness::{self, ProbeOptions};
use crate::runners::container::{self, ContainerSpec, ContainerStart};
use crate::runners::process::{self, ProcessSpawn};
use crate::runners::ServiceHandle;
use crate::{Error, Result};
use lo1_config::{ReadinessProbe, ServiceConfig, ServiceMode, WorkspaceConfig};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Everything needed to start one service
pub struct StartRequest<'a> {
    /// The service name
    pub service_name: &'a str,
    /// Its manifest entry
    pub service: &'a ServiceConfig,
    /// The workspace manifest
    pub config: &'a WorkspaceConfig,
    /// Plugin backing the service's type, if it is not builtin
    pub plugin: Option<&'a Arc<dyn Plugin>>,
    /// Resolved endpoints
    pub registry: &'a EndpointRegistry,
    /// Env vars exported by plugin contributions
    pub plugin_env: &'a BTreeMap<String, String>,
    /// Absolute workspace directory
    pub workspace_dir: &'a Path,
}

enum RunnerChoice {
    PluginContainer(ContainerSpec),
    Process(String),
    Compose,
}

/// Start one service: select the runner, run `preStart`, spawn, gate on the
/// readiness probe, run `postStart`. A probe failure stops the runner
/// before the error propagates.
pub async fn start_service(
    req: StartRequest<'_>,
    cancel: &CancelToken,
    events: &EventBus,
) -> Result<Arc<ServiceHandle>> {
    let ctx = PluginContext {
        config: req.config,
        registry: req.registry,
        workspace_dir: req.workspace_dir,
    };

    let choice = select_runner(&req, &ctx)?;
    let consumer = match &choice {
        RunnerChoice::PluginContainer(_) | RunnerChoice::Compose => ConsumerMode::Container,
        // The decision table only yields a process runner for dev mode, so
        // a process consumer is always host-side.
        RunnerChoice::Process(_) => ConsumerMode::Host,
    };

    let env = endpoints::service_env(
        req.service_name,
        req.service,
        req.config,
        req.registry,
        req.plugin_env,
        consumer,
    );
    let hook_cwd = req
        .workspace_dir
        .join(req.service.path.as_deref().unwrap_or("."));

    events.service(req.service_name, ServiceStatus::Starting);

    if let Some(pre_start) = &req.service.hooks.pre_start {
        hooks::execute_hook("preStart", pre_start, &hook_cwd, &env, cancel, events).await?;
    }

    let handle = match choice {
        RunnerChoice::PluginContainer(spec) => {
            let runner = container::start(
                ContainerStart {
                    workspace_name: req.config.name.clone(),
                    service_name: req.service_name.to_string(),
                    spec,
                    network: names::network_name(&req.config.name),
                    env,
                },
                events,
            )
            .await?;
            Arc::new(ServiceHandle::from_container(runner))
        }
        RunnerChoice::Process(command) => {
            let runner = process::start(
                ProcessSpawn {
                    service_name: req.service_name.to_string(),
                    command,
                    cwd: hook_cwd.clone(),
                    env,
                },
                events,
            )
            .await?;
            Arc::new(ServiceHandle::from_process(runner))
        }
        // Compose-managed services were started by the compose phases; the
        // starter only hands out the passive stop-token.
        RunnerChoice::Compose => Arc::new(ServiceHandle::compose(req.service_name)),
    };

    if let Some(probe_config) = &req.service.readiness_probe {
        let probe = probe_options(probe_config, req.service_name);
        if let Err(probe_err) = readiness::wait_for_ready(probe, cancel).await {
            if let Err(stop_err) = handle.stop(None).await {
                warn!(
                    service = req.service_name,
                    "cleanup after failed probe also failed: {}", stop_err
                );
            }
            return Err(probe_err);
        }
    }

    if let Some(post_start) = &req.service.hooks.post_start {
        let env = endpoints::service_env(
            req.service_name,
            req.service,
            req.config,
            req.registry,
            req.plugin_env,
            consumer,
        );
        hooks::execute_hook("postStart", post_start, &hook_cwd, &env, cancel, events).await?;
    }

    events.service(req.service_name, ServiceStatus::Started);
    Ok(handle)
}

fn probe_options(probe: &ReadinessProbe, service_name: &str) -> ProbeOptions {
    let mut opts = ProbeOptions::new(probe.url().to_string(), service_name.to_string());
    if let ReadinessProbe::Detailed {
        timeout_ms,
        interval_ms,
        backoff_multiplier,
        max_interval_ms,
        ..
    } = probe
    {
        if let Some(ms) = timeout_ms {
            opts.timeout = Duration::from_millis(*ms);
        }
        if let Some(ms) = interval_ms {
            opts.initial_interval = Duration::from_millis(*ms);
        }
        if let Some(multiplier) = backoff_multiplier {
            opts.backoff_multiplier = *multiplier;
        }
        if let Some(ms) = max_interval_ms {
            opts.max_interval = Duration::from_millis(*ms);
        }
    }
    opts
}

fn select_runner(req: &StartRequest<'_>, ctx: &PluginContext<'_>) -> Result<RunnerChoice> {
    if let Some(plugin) = req.plugin {
        if let Some(spec) = plugin.container_config(req.service_name, req.service, ctx) {
            return Ok(RunnerChoice::PluginContainer(spec));
        }
    }

    if req.service.is_builtin_type() && req.service.mode == ServiceMode::Dev {
        if let Some(command) = &req.service.command {
            return Ok(RunnerChoice::Process(command.clone()));
        }
    }

    if req.service.mode == ServiceMode::Container
        && (req.service.container_image.is_some() || req.service.compose.is_some())
    {
        return Ok(RunnerChoice::Compose);
    }

    Err(Error::ServiceStart {
        service: req.service_name.to_string(),
        message: format!(
            "no runner for type '{}' in mode '{:?}'",
            req.service.service_type, req.service.mode
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OrchestratorEvent;
    use crate::plugins::PluginRegistry;
    use crate::runners::RunnerKind;
    use async_trait::async_trait;
    use lo1_config::parser;
    use std::time::Duration;

    fn config(yaml: &str) -> WorkspaceConfig {
        parser::parse_str(yaml).unwrap()
    }

    fn request<'a>(
        name: &'a str,
        config: &'a WorkspaceConfig,
        registry: &'a EndpointRegistry,
        plugin: Option<&'a Arc<dyn Plugin>>,
        plugin_env: &'a BTreeMap<String, String>,
        workspace_dir: &'a Path,
    ) -> StartRequest<'a> {
        StartRequest {
            service_name: name,
            service: &config.services[name],
            config,
            plugin,
            registry,
            plugin_env,
            workspace_dir,
        }
    }

    #[smol_potat::test]
    async fn test_dev_service_uses_process_runner() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(
            r#"
version: "1"
name: ws
services:
  api:
    command: sleep 5
"#,
        );
        let registry = crate::endpoints::build(&config);
        let plugin_env = BTreeMap::new();
        let (events, _rx) = EventBus::new();
        let cancel = CancelToken::new();

        let handle = start_service(
            request("api", &config, &registry, None, &plugin_env, dir.path()),
            &cancel,
            &events,
        )
        .await
        .unwrap();

        assert_eq!(handle.kind(), RunnerKind::Process);
        assert!(handle.pid().is_some());
        handle.stop(Some(Duration::from_secs(1))).await.unwrap();
    }

    #[smol_potat::test]
    async fn test_container_mode_returns_passive_handle() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(
            r#"
version: "1"
name: ws
services:
  db:
    mode: container
    containerImage: postgres:16
"#,
        );
        let registry = crate::endpoints::build(&config);
        let plugin_env = BTreeMap::new();
        let (events, _rx) = EventBus::new();
        let cancel = CancelToken::new();

        let handle = start_service(
            request("db", &config, &registry, None, &plugin_env, dir.path()),
            &cancel,
            &events,
        )
        .await
        .unwrap();

        assert_eq!(handle.kind(), RunnerKind::Compose);
        handle.stop(None).await.unwrap();
    }

    #[smol_potat::test]
    async fn test_no_runner_determinable() {
        let dir = tempfile::tempdir().unwrap();
        // A dev-mode plugin-typed service without a plugin container config
        // has no runner.
        let config = config(
            r#"
version: "1"
name: ws
plugins:
  widget: "@lo1/plugin-widget"
services:
  thing:
    type: widget
"#,
        );
        let registry = crate::endpoints::build(&config);
        let plugin_env = BTreeMap::new();
        let (events, _rx) = EventBus::new();
        let cancel = CancelToken::new();

        struct WidgetPlugin;
        #[async_trait]
        impl Plugin for WidgetPlugin {
            fn type_name(&self) -> &str {
                "widget"
            }
        }
        let mut plugins = PluginRegistry::new();
        plugins.register(Arc::new(WidgetPlugin));
        let resolved = plugins.resolve(&config).unwrap();
        let plugin = resolved.get("widget");

        let err = start_service(
            request("thing", &config, &registry, plugin, &plugin_env, dir.path()),
            &cancel,
            &events,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::ServiceStart { service, .. } if service == "thing"));
    }

    #[smol_potat::test]
    async fn test_probe_failure_stops_runner() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(
            r#"
version: "1"
name: ws
services:
  api:
    command: sleep 60
    readinessProbe:
      url: http://127.0.0.1:1/unused
      timeoutMs: 150
      intervalMs: 20
"#,
        );

        let registry = crate::endpoints::build(&config);
        let plugin_env = BTreeMap::new();
        let (events, rx) = EventBus::new();
        let cancel = CancelToken::new();

        let err = start_service(
            request("api", &config, &registry, None, &plugin_env, dir.path()),
            &cancel,
            &events,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ReadinessProbe { .. }));

        // The spawned process was stopped and no Started event was emitted.
        let mut started = false;
        while let Ok(event) = rx.try_recv() {
            if let OrchestratorEvent::Service { status, .. } = event {
                if status == ServiceStatus::Started {
                    started = true;
                }
            }
        }
        assert!(!started);
    }

    #[smol_potat::test]
    async fn test_hook_order_pre_start_runs_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("pre-start-ran");
        let yaml = format!(
            r#"
version: "1"
name: ws
services:
  api:
    command: "test -f {marker} && sleep 5"
    hooks:
      preStart: "touch {marker}"
"#,
            marker = marker.display()
        );
        let config = parser::parse_str(&yaml).unwrap();
        let registry = crate::endpoints::build(&config);
        let plugin_env = BTreeMap::new();
        let (events, _rx) = EventBus::new();
        let cancel = CancelToken::new();

        let handle = start_service(
            request("api", &config, &registry, None, &plugin_env, dir.path()),
            &cancel,
            &events,
        )
        .await
        .unwrap();

        // The command only stays alive if the marker existed when it ran.
        smol::Timer::after(Duration::from_millis(300)).await;
        assert!(handle.is_running());
        handle.stop(Some(Duration::from_secs(1))).await.unwrap();
    }
}
