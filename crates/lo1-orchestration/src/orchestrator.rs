//! Orchestrator: workspace start and stop
//!
//! Drives the full phase sequence: stale cleanup, config load, graph and
//! registry construction, plugin resolution, compose generation, gated
//! infrastructure and application phases, service layers, workspace hooks.
//! Cancellation is checked at phase and layer boundaries; any failure after
//! services have started triggers best-effort reverse teardown.

use crate::cancel::CancelToken;
use crate::compose_gen;
use crate::dag;
use crate::endpoints::{self, ConsumerMode};
use crate::events::{EventBus, ServiceStatus};
use crate::filter;
use crate::hooks;
use crate::hosts;
use crate::plugins::{PluginContext, PluginRegistry};
use crate::proxy;
use crate::runners::compose::{ComposeRunner, LogsFollower, WaitOptions};
use crate::runners::ServiceHandle;
use crate::starter::{self, StartRequest};
use crate::state::{StateStore, WorkspaceState};
use crate::tls;
use crate::{Error, Result};
use lo1_config::{ServiceMode, WorkspaceConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Options for [`Orchestrator::start`]
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Workspace directory containing `lo1.yaml`
    pub workspace_dir: PathBuf,
    /// Manifest path override; defaults to `<workspace_dir>/lo1.yaml`
    pub config_path: Option<PathBuf>,
    /// Start only these services and their transitive dependencies
    pub service_filter: Option<Vec<String>>,
    /// Force every non-skip service into this mode
    pub mode_override: Option<ServiceMode>,
}

impl StartOptions {
    /// Defaults for a workspace directory
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            config_path: None,
            service_filter: None,
            mode_override: None,
        }
    }
}

/// Options for [`Orchestrator::stop`]
#[derive(Debug, Clone)]
pub struct StopOptions {
    /// Workspace directory containing `.lo1/state.json`
    pub workspace_dir: PathBuf,
    /// Manifest path override; defaults to `<workspace_dir>/lo1.yaml`
    pub config_path: Option<PathBuf>,
    /// Also remove volumes and orphan containers
    pub clean: bool,
}

impl StopOptions {
    /// Defaults for a workspace directory
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            config_path: None,
            clean: false,
        }
    }
}

/// Everything a foreground `up` needs to keep running and later stop
#[derive(Debug)]
pub struct StartedWorkspace {
    /// Stop-tokens for every started service, in start order
    pub handles: Vec<Arc<ServiceHandle>>,
    /// The compose runner bound to this run's project and file list
    pub compose: ComposeRunner,
    /// The effective (filtered, mode-overridden) configuration
    pub config: WorkspaceConfig,
    /// The log follower, when compose services were started
    pub logs: Option<LogsFollower>,
}

/// The orchestration engine
pub struct Orchestrator {
    plugins: PluginRegistry,
    events: EventBus,
    cancel: CancelToken,
}

impl Orchestrator {
    /// Create an orchestrator with a plugin registry, an event bus, and the
    /// cancellation token threaded through every operation
    pub fn new(plugins: PluginRegistry, events: EventBus, cancel: CancelToken) -> Self {
        Self {
            plugins,
            events,
            cancel,
        }
    }

    /// The orchestrator's cancellation token
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Bring the workspace up. See the module docs for the phase sequence.
    pub async fn start(&self, opts: StartOptions) -> Result<StartedWorkspace> {
        let workspace_dir = opts
            .workspace_dir
            .canonicalize()
            .unwrap_or_else(|_| opts.workspace_dir.clone());
        let store = StateStore::new(&workspace_dir);

        // Phase 1: recover from a previous run that never tore down.
        self.cleanup_stale(&store).await;
        self.cancel.check("startup")?;

        // Phase 2: load and shape the config.
        self.events.phase("Loading configuration");
        let config_path = opts
            .config_path
            .clone()
            .unwrap_or_else(|| workspace_dir.join("lo1.yaml"));
        let mut config = lo1_config::parser::parse_file(&config_path)?;
        if let Some(mode) = opts.mode_override {
            for service in config.services.values_mut() {
                if service.mode != ServiceMode::Skip {
                    service.mode = mode;
                }
            }
        }
        if let Some(requested) = &opts.service_filter {
            let closure = filter::resolve(requested, &config)?;
            filter::apply(&mut config, &closure);
        }

        // Phase 3: derived values.
        let dag = dag::build(&config)?;
        let registry = endpoints::build(&config);
        info!(
            workspace = %config.name,
            services = dag.service_count,
            layers = dag.layers.len(),
            "workspace loaded"
        );

        // Phases 4-5: plugins and their compose contributions.
        let resolved = self.plugins.resolve(&config)?;
        let ctx = PluginContext {
            config: &config,
            registry: &registry,
            workspace_dir: &workspace_dir,
        };
        let (contributions, plugin_env) =
            PluginRegistry::collect_contributions(&resolved, &ctx)?;

        // Phase 6: compose project generation.
        self.events.phase("Generating compose project");
        let gen = compose_gen::generate(&config, &contributions, &workspace_dir)?;

        // Phase 7: proxy config and hosts block.
        let artifacts = proxy::generate(&config, &registry);
        if !artifacts.caddyfile.is_empty() {
            std::fs::write(proxy::caddyfile_path(&workspace_dir), &artifacts.caddyfile)?;
        }
        let block = hosts::generate_hosts_block(&artifacts.domains);
        if !block.is_empty() {
            self.events.phase("Applying hosts entries");
            hosts::apply_hosts_block(&block).await?;
        }

        // Phase 8: baseline state so any later failure is recoverable.
        let mut state = WorkspaceState::baseline(
            &config.name,
            gen.file_args.iter().map(|p| p.display().to_string()).collect(),
            &workspace_dir,
        );
        store.save(&state)?;

        // Phase 9: compose phases, each gated on readiness.
        let compose = ComposeRunner::new(
            state.project_name.clone(),
            gen.file_args.clone(),
            &workspace_dir,
        );
        let mut logs = None;
        if !gen.infra_services.is_empty() {
            self.cancel.check("infrastructure startup")?;
            self.events.phase("Starting infrastructure");
            compose.up(&gen.infra_services, &self.cancel, &self.events).await?;
            logs = Some(compose.logs(&self.events).await?);
            let wait_for_exit: BTreeSet<String> = gen
                .init_tasks
                .iter()
                .filter(|t| gen.infra_services.contains(*t))
                .cloned()
                .collect();
            compose
                .wait(
                    WaitOptions::new(gen.infra_services.clone(), wait_for_exit),
                    &self.cancel,
                )
                .await?;
        }
        if !gen.app_services.is_empty() {
            self.cancel.check("application container startup")?;
            self.events.phase("Starting application containers");
            compose.up(&gen.app_services, &self.cancel, &self.events).await?;
            if logs.is_none() {
                logs = Some(compose.logs(&self.events).await?);
            }
            let wait_for_exit: BTreeSet<String> = gen
                .init_tasks
                .iter()
                .filter(|t| gen.app_services.contains(*t))
                .cloned()
                .collect();
            compose
                .wait(
                    WaitOptions::new(gen.app_services.clone(), wait_for_exit),
                    &self.cancel,
                )
                .await?;
        }

        // Phase 10: TLS trust.
        let tls_enabled = config
            .proxy
            .as_ref()
            .and_then(|p| p.tls.as_ref())
            .map(|t| t.enabled)
            .unwrap_or(false);
        if tls_enabled {
            self.events.phase("Setting up TLS trust");
            tls::trust_proxy_ca(&format!("{}-proxy", state.project_name), &workspace_dir).await?;
        }

        // Phase 11: workspace hook, then plugin provisioning fan-out.
        if let Some(hook) = &config.hooks.post_infrastructure {
            let env = workspace_hook_env(&config, &registry);
            hooks::execute_hook(
                "postInfrastructure",
                hook,
                &workspace_dir,
                &env,
                &self.cancel,
                &self.events,
            )
            .await?;
        }
        if !resolved.is_empty() {
            self.events.phase("Provisioning infrastructure");
            futures::future::try_join_all(resolved.values().map(|p| p.provision_infra(&ctx)))
                .await?;
            self.events.phase("Seeding data");
            futures::future::try_join_all(resolved.values().map(|p| p.seed_data(&ctx))).await?;
        }

        // Phase 12: service layers, parallel within a layer.
        self.events.phase("Starting services");
        let mut handles: Vec<Arc<ServiceHandle>> = Vec::new();
        for layer in &dag.layers {
            if self.cancel.is_cancelled() {
                self.teardown_handles(&handles).await;
                return Err(Error::orchestrator("startup aborted by cancellation"));
            }

            let members: Vec<&String> = layer
                .iter()
                .filter(|name| config.services[name.as_str()].mode != ServiceMode::Skip)
                .collect();
            if members.is_empty() {
                continue;
            }

            let starts = members.iter().map(|name| {
                let service = &config.services[name.as_str()];
                starter::start_service(
                    StartRequest {
                        service_name: name.as_str(),
                        service,
                        config: &config,
                        plugin: resolved.get(&service.service_type),
                        registry: &registry,
                        plugin_env: &plugin_env,
                        workspace_dir: &workspace_dir,
                    },
                    &self.cancel,
                    &self.events,
                )
            });

            // Settled-all join: a failure in one member still lets its
            // siblings finish so they can be torn down.
            let results = futures::future::join_all(starts).await;
            let mut first_error = None;
            for result in results {
                match result {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        self.events.error(e.to_string());
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
            if let Some(error) = first_error {
                self.teardown_handles(&handles).await;
                return Err(error);
            }
        }

        // Phase 13: record the concrete runner identities.
        state.record_handles(&handles);
        store.save(&state)?;

        // Phase 14: workspace ready.
        if let Some(hook) = &config.hooks.post_setup {
            let env = workspace_hook_env(&config, &registry);
            hooks::execute_hook(
                "postSetup",
                hook,
                &workspace_dir,
                &env,
                &self.cancel,
                &self.events,
            )
            .await?;
        }
        self.events.phase("Ready");

        Ok(StartedWorkspace {
            handles,
            compose,
            config,
            logs,
        })
    }

    /// Tear the workspace down. A no-op when no state file exists.
    ///
    /// In-memory handles (the foreground `up` exiting) are preferred;
    /// otherwise handles are rehydrated from the state file. Hosts entries
    /// are deliberately left in place; `lo1 hosts --remove` clears them.
    pub async fn stop(
        &self,
        opts: StopOptions,
        handles: Option<Vec<Arc<ServiceHandle>>>,
    ) -> Result<()> {
        let workspace_dir = opts
            .workspace_dir
            .canonicalize()
            .unwrap_or_else(|_| opts.workspace_dir.clone());
        let store = StateStore::new(&workspace_dir);

        let Some(state) = store.load()? else {
            self.events.phase("No running workspace found");
            return Ok(());
        };

        let config_path = opts
            .config_path
            .clone()
            .unwrap_or_else(|| workspace_dir.join("lo1.yaml"));
        if let Ok(config) = lo1_config::parser::parse_file(&config_path) {
            if let Some(hook) = &config.hooks.pre_stop {
                let registry = endpoints::build(&config);
                let env = workspace_hook_env(&config, &registry);
                // Teardown proceeds even when the hook fails.
                if let Err(e) = hooks::execute_hook(
                    "preStop",
                    hook,
                    &workspace_dir,
                    &env,
                    &self.cancel,
                    &self.events,
                )
                .await
                {
                    warn!("preStop hook failed: {}", e);
                    self.events.error(format!("preStop hook failed: {}", e));
                }
            }
        }

        // Sequential, not parallel: keeps log output readable and avoids
        // thrashing the container daemon.
        let handles = handles.unwrap_or_else(|| state.hydrate_handles());
        for handle in &handles {
            self.events.service(handle.service_name(), ServiceStatus::Stopping);
            if let Err(e) = handle.stop(None).await {
                warn!(service = handle.service_name(), "stop failed: {}", e);
                self.events.error(format!(
                    "failed to stop '{}': {}",
                    handle.service_name(),
                    e
                ));
            }
            self.events.service(handle.service_name(), ServiceStatus::Stopped);
        }

        let compose = ComposeRunner::new(
            state.project_name.clone(),
            state.file_args.iter().map(PathBuf::from).collect(),
            &state.workspace_dir,
        );
        if let Err(e) = compose.down(opts.clean).await {
            warn!(project = %state.project_name, "compose down failed: {}", e);
            self.events.error(format!("compose down failed: {}", e));
        }

        store.remove()?;
        self.events.phase("Stopped");
        Ok(())
    }

    /// Best-effort cleanup of a previous run recorded in the state file.
    /// Failures are logged and never block the new run.
    async fn cleanup_stale(&self, store: &StateStore) {
        let state = match store.load() {
            Ok(Some(state)) => state,
            Ok(None) => return,
            Err(e) => {
                warn!("unreadable state file, discarding: {}", e);
                let _ = store.remove();
                return;
            }
        };

        self.events.phase("Cleaning up stale workspace");
        info!(project = %state.project_name, "cleaning up stale run");

        for handle in state.hydrate_handles() {
            if let Err(e) = handle.stop(None).await {
                warn!(service = handle.service_name(), "stale stop failed: {}", e);
            }
        }

        let compose = ComposeRunner::new(
            state.project_name.clone(),
            state.file_args.iter().map(PathBuf::from).collect(),
            &state.workspace_dir,
        );
        if let Err(e) = compose.down(false).await {
            warn!(project = %state.project_name, "stale compose down failed: {}", e);
        }

        if let Err(e) = store.remove() {
            warn!("could not remove stale state file: {}", e);
        }
    }

    /// Reverse-order, best-effort teardown after a mid-start failure or
    /// cancellation; errors are logged so the original failure survives.
    async fn teardown_handles(&self, handles: &[Arc<ServiceHandle>]) {
        for handle in handles.iter().rev() {
            self.events.service(handle.service_name(), ServiceStatus::Stopping);
            if let Err(e) = handle.stop(None).await {
                warn!(service = handle.service_name(), "teardown failed: {}", e);
                self.events.error(format!(
                    "failed to stop '{}': {}",
                    handle.service_name(),
                    e
                ));
            }
            self.events.service(handle.service_name(), ServiceStatus::Stopped);
        }
    }
}

/// Environment for workspace-level hooks: host-vantage discovery variables
/// plus the workspace identity.
fn workspace_hook_env(
    config: &WorkspaceConfig,
    registry: &endpoints::EndpointRegistry,
) -> BTreeMap<String, String> {
    let mut env = registry.discovery_env(ConsumerMode::Host);
    env.insert(
        endpoints::ENV_WORKSPACE_NAME.to_string(),
        config.name.clone(),
    );
    env
}
