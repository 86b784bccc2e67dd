//! Plugin registry
//!
//! Plugins extend the orchestrator with typed services (a `postgres` type,
//! a `redis` type, ...). They are compile-time registered implementations of
//! [`Plugin`]; the manifest's `plugins` map must name registered types, and
//! the orchestrator only consumes the lifecycle hooks defined here.

use crate::compose_gen::ComposeService;
use crate::endpoints::EndpointRegistry;
use crate::runners::container::ContainerSpec;
use crate::{Error, Result};
use async_trait::async_trait;
use lo1_config::{ServiceConfig, WorkspaceConfig};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Shared read-only context handed to every plugin hook
pub struct PluginContext<'a> {
    /// The loaded workspace manifest
    pub config: &'a WorkspaceConfig,
    /// Resolved service endpoints
    pub registry: &'a EndpointRegistry,
    /// Absolute workspace directory
    pub workspace_dir: &'a Path,
}

/// Compose services and env vars a plugin merges into the generated project
#[derive(Debug, Clone, Default)]
pub struct ComposeContribution {
    /// Service definitions keyed by compose service name
    pub services: BTreeMap<String, ComposeService>,
    /// Environment variables exported to every workspace service
    pub env: BTreeMap<String, String>,
}

/// A typed extension of the orchestrator.
///
/// All hooks have no-op defaults so a plugin implements only what it needs.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The service type this plugin handles, as referenced by
    /// `services.<name>.type` in the manifest
    fn type_name(&self) -> &str;

    /// Container configuration for a service of this type, when the plugin
    /// runs its services as single containers
    fn container_config(
        &self,
        service_name: &str,
        service: &ServiceConfig,
        ctx: &PluginContext<'_>,
    ) -> Option<ContainerSpec> {
        let _ = (service_name, service, ctx);
        None
    }

    /// Compose services and env vars to merge into the generated project,
    /// given every manifest service of this plugin's type
    fn compose_contribution(
        &self,
        services: &BTreeMap<String, ServiceConfig>,
        ctx: &PluginContext<'_>,
    ) -> Result<Option<ComposeContribution>> {
        let _ = (services, ctx);
        Ok(None)
    }

    /// Provision infrastructure after compose services are up; runs in
    /// parallel with other plugins
    async fn provision_infra(&self, ctx: &PluginContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Seed data after provisioning; runs in parallel with other plugins
    async fn seed_data(&self, ctx: &PluginContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

impl std::fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin").field("type_name", &self.type_name()).finish()
    }
}

/// Compile-time plugin registry
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its type name; the last registration wins
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.type_name().to_string(), plugin);
    }

    /// Look up a plugin by type name
    pub fn get(&self, type_name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.get(type_name)
    }

    /// Resolve the plugins a workspace declares, validating that every
    /// declared type is registered and that every plugin-typed service has a
    /// plugin to back it.
    pub fn resolve(&self, config: &WorkspaceConfig) -> Result<BTreeMap<String, Arc<dyn Plugin>>> {
        let mut resolved = BTreeMap::new();

        for type_name in config.plugins.keys() {
            let plugin = self.plugins.get(type_name).ok_or_else(|| Error::Plugin {
                message: format!("plugin type '{}' is not registered", type_name),
            })?;
            resolved.insert(type_name.clone(), plugin.clone());
        }

        for (name, service) in &config.services {
            if !service.is_builtin_type() && !resolved.contains_key(&service.service_type) {
                return Err(Error::Plugin {
                    message: format!(
                        "service '{}' has type '{}' but no such plugin is available",
                        name, service.service_type
                    ),
                });
            }
        }

        Ok(resolved)
    }

    /// Collect compose contributions from the resolved plugins: each plugin
    /// sees the manifest services of its own type. Returns the merged
    /// contributions and the union of exported env vars.
    pub fn collect_contributions(
        resolved: &BTreeMap<String, Arc<dyn Plugin>>,
        ctx: &PluginContext<'_>,
    ) -> Result<(Vec<ComposeContribution>, BTreeMap<String, String>)> {
        let mut contributions = Vec::new();
        let mut env = BTreeMap::new();

        for (type_name, plugin) in resolved {
            let typed_services: BTreeMap<String, ServiceConfig> = ctx
                .config
                .services
                .iter()
                .filter(|(_, svc)| &svc.service_type == type_name)
                .map(|(name, svc)| (name.clone(), svc.clone()))
                .collect();

            if let Some(contribution) = plugin.compose_contribution(&typed_services, ctx)? {
                env.extend(contribution.env.clone());
                contributions.push(contribution);
            }
        }

        Ok((contributions, env))
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("types", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}
