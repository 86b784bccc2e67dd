//! Compose document generation
//!
//! Emits the compose project for a workspace: a typed document serialized
//! with `serde_yaml` to `.lo1/compose.generated.yaml`, the ordered `-f` file
//! list (generated file, preprocessed per-service files, extra file), and
//! the infra/app partition the orchestrator's phased startup relies on.

use crate::names;
use crate::plugins::ComposeContribution;
use crate::{Error, Result};
use lo1_config::{ServiceMode, WorkspaceConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One service in the generated compose document
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ComposeService {
    /// Container image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Command override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Published ports, `host:container` form
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Bind mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Networks the service attaches to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    /// Extra host mappings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_hosts: Vec<String>,
}

/// A network in the generated compose document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComposeNetwork {
    /// Network driver
    pub driver: String,
}

/// The generated compose document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComposeDocument {
    /// Compose project name
    pub name: String,
    /// Service definitions
    #[serde(default)]
    pub services: BTreeMap<String, ComposeService>,
    /// Network definitions
    #[serde(default)]
    pub networks: BTreeMap<String, ComposeNetwork>,
}

/// Everything the orchestrator needs to drive the compose phases
#[derive(Debug, Clone)]
pub struct ComposeGenOutput {
    /// Path of the generated document
    pub compose_file: PathBuf,
    /// Ordered `-f` file list for every compose invocation
    pub file_args: Vec<PathBuf>,
    /// Compose services started in the infrastructure phase: proxy, plugin
    /// contributions, extra-compose services
    pub infra_services: Vec<String>,
    /// Compose services started in the application phase: container-mode
    /// manifest services
    pub app_services: Vec<String>,
    /// Services that must run to completion before dependents start
    pub init_tasks: BTreeSet<String>,
}

/// Generate the compose project for a workspace.
///
/// Side effects: writes `.lo1/compose.generated.yaml` and a preprocessed
/// copy of each per-service compose file (relative host paths resolved
/// against the original file's directory).
pub fn generate(
    config: &WorkspaceConfig,
    contributions: &[ComposeContribution],
    workspace_dir: &Path,
) -> Result<ComposeGenOutput> {
    let network = names::network_name(&config.name);
    let lo1_dir = workspace_dir.join(names::WORKSPACE_DIR_NAME);
    std::fs::create_dir_all(&lo1_dir)?;

    let mut document = ComposeDocument {
        name: names::project_name(&config.name),
        services: BTreeMap::new(),
        networks: BTreeMap::from([(
            network.clone(),
            ComposeNetwork {
                driver: "bridge".to_string(),
            },
        )]),
    };

    let mut infra_services = Vec::new();
    let mut app_services = Vec::new();
    let mut init_tasks: BTreeSet<String> = BTreeSet::new();
    let mut per_service_files = Vec::new();

    for (name, service) in &config.services {
        if service.mode != ServiceMode::Container {
            continue;
        }
        if service.init_task {
            init_tasks.insert(name.clone());
        }

        if let Some(image) = &service.container_image {
            let mut ports = Vec::new();
            if let Some(port) = service.port {
                let host_port = service.effective_host_port().unwrap_or(port);
                ports.push(format!("{}:{}", host_port, port));
            }
            // Container services carry only their manifest env; they reach
            // siblings through the project network's service-name DNS.
            document.services.insert(
                name.clone(),
                ComposeService {
                    image: Some(image.clone()),
                    environment: service.env.clone(),
                    ports,
                    networks: vec![network.clone()],
                    ..Default::default()
                },
            );
            app_services.push(name.clone());
        } else if let Some(compose) = &service.compose {
            let source_dir = workspace_dir.join(service.path.as_deref().unwrap_or("."));
            let source = resolve_path(&source_dir, compose);
            let target = lo1_dir.join(format!("compose-{}.yaml", name));
            preprocess_compose_file(&source, &target)?;
            per_service_files.push(target);
            app_services.push(name.clone());
        }
    }

    for contribution in contributions {
        for (name, service) in &contribution.services {
            let mut service = service.clone();
            if service.networks.is_empty() {
                service.networks = vec![network.clone()];
            }
            document.services.insert(name.clone(), service);
            infra_services.push(name.clone());
        }
    }

    if let Some(proxy) = &config.proxy {
        if proxy.enabled {
            let proxy_name = names::proxy_service_name(&config.name);
            let caddyfile = lo1_dir.join("Caddyfile");
            let mut ports = vec![format!("{}:80", proxy.port.unwrap_or(80))];
            if let Some(tls) = &proxy.tls {
                if tls.enabled {
                    ports.push(format!("{}:443", tls.port.unwrap_or(443)));
                }
            }
            let extra_hosts = if cfg!(target_os = "linux") {
                vec!["host.docker.internal:host-gateway".to_string()]
            } else {
                Vec::new()
            };
            document.services.insert(
                proxy_name.clone(),
                ComposeService {
                    image: Some("caddy:2-alpine".to_string()),
                    volumes: vec![format!("{}:/etc/caddy/Caddyfile:ro", caddyfile.display())],
                    ports,
                    networks: vec![network.clone()],
                    extra_hosts,
                    ..Default::default()
                },
            );
            infra_services.push(proxy_name);
        }
    }

    let compose_file = lo1_dir.join("compose.generated.yaml");
    std::fs::write(&compose_file, serde_yaml::to_string(&document)?)?;
    debug!(path = %compose_file.display(), "compose document written");

    let mut file_args = vec![compose_file.clone()];
    file_args.extend(per_service_files);

    if let Some(extra) = &config.extra_compose {
        let extra_path = resolve_path(workspace_dir, extra.file());
        for name in discover_service_names(&extra_path)? {
            infra_services.push(name);
        }
        init_tasks.extend(extra.init_task_services().iter().cloned());
        file_args.push(extra_path);
    }

    Ok(ComposeGenOutput {
        compose_file,
        file_args,
        infra_services,
        app_services,
        init_tasks,
    })
}

fn resolve_path(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Service names defined by an external compose file
fn discover_service_names(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Compose {
        message: format!("cannot read extra compose file {}: {}", path.display(), e),
    })?;
    let value: serde_yaml::Value = serde_yaml::from_str(&content)?;

    let mut names = Vec::new();
    if let Some(services) = value.get("services").and_then(|s| s.as_mapping()) {
        for key in services.keys() {
            if let Some(name) = key.as_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Copy a per-service compose file into `.lo1/`, resolving relative host
/// paths (bind-mount sources and build contexts) against the original
/// file's directory so the copy works from the workspace root.
fn preprocess_compose_file(source: &Path, target: &Path) -> Result<()> {
    let content = std::fs::read_to_string(source).map_err(|e| Error::Compose {
        message: format!("cannot read compose file {}: {}", source.display(), e),
    })?;
    let mut value: serde_yaml::Value = serde_yaml::from_str(&content)?;
    let base = source.parent().unwrap_or(Path::new(".")).to_path_buf();

    if let Some(services) = value.get_mut("services").and_then(|s| s.as_mapping_mut()) {
        for (_, service) in services.iter_mut() {
            if let Some(volumes) = service.get_mut("volumes").and_then(|v| v.as_sequence_mut()) {
                for volume in volumes.iter_mut() {
                    if let Some(text) = volume.as_str() {
                        *volume = serde_yaml::Value::String(absolutize_volume(text, &base));
                    }
                }
            }
            if let Some(build) = service.get_mut("build") {
                match build {
                    serde_yaml::Value::String(context) => {
                        *context = resolve_path(&base, context).display().to_string();
                    }
                    serde_yaml::Value::Mapping(mapping) => {
                        let key = serde_yaml::Value::String("context".to_string());
                        if let Some(serde_yaml::Value::String(context)) = mapping.get_mut(&key) {
                            *context = resolve_path(&base, context).display().to_string();
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    std::fs::write(target, serde_yaml::to_string(&value)?)?;
    Ok(())
}

/// Absolutize the host side of a `host:container[:opts]` bind mount when it
/// looks like a relative path. Named volumes are left alone.
fn absolutize_volume(volume: &str, base: &Path) -> String {
    let Some((host, rest)) = volume.split_once(':') else {
        return volume.to_string();
    };
    if host.starts_with('.') {
        format!("{}:{}", resolve_path(base, host).display(), rest)
    } else {
        volume.to_string()
    }
}
