//! Endpoint registry and discovery environment
//!
//! Derives per-service internal/external/proxy URLs from the manifest and
//! turns them into the `LO1_SERVICE_*` discovery variables injected into
//! every child.

use lo1_config::{ServiceConfig, ServiceMode, WorkspaceConfig};
use std::collections::BTreeMap;

/// Reserved variable carrying the consuming service's own name
pub const ENV_SERVICE_NAME: &str = "LO1_SERVICE_NAME";
/// Reserved variable carrying the workspace name
pub const ENV_WORKSPACE_NAME: &str = "LO1_WORKSPACE_NAME";

/// Where the consumer of an endpoint runs, which decides whether it sees
/// container-internal or host-visible addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerMode {
    /// The consumer is a host process
    Host,
    /// The consumer runs inside the workspace container network
    Container,
}

/// Resolved addresses for one service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEndpoint {
    /// Service name
    pub name: String,
    /// Port inside the container network
    pub port: u16,
    /// Host-visible port
    pub host_port: u16,
    /// `http://<name>:<port>` — reachable from inside the network
    pub internal_url: String,
    /// `http://localhost:<hostPort>` — reachable from the host
    pub external_url: String,
    /// `<scheme>://<name>.<workspace>.<tld>` via the reverse proxy
    pub proxy_url: String,
    /// The service's execution mode
    pub mode: ServiceMode,
}

impl ServiceEndpoint {
    /// The URL appropriate for the given consumer
    pub fn url_for(&self, consumer: ConsumerMode) -> &str {
        match consumer {
            ConsumerMode::Host => &self.external_url,
            ConsumerMode::Container => &self.internal_url,
        }
    }

    /// The port appropriate for the given consumer
    pub fn port_for(&self, consumer: ConsumerMode) -> u16 {
        match consumer {
            ConsumerMode::Host => self.host_port,
            ConsumerMode::Container => self.port,
        }
    }
}

/// Endpoint registry for a workspace
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<String, ServiceEndpoint>,
}

/// Build the registry. Only services with a port and a non-skip mode are
/// registered.
pub fn build(config: &WorkspaceConfig) -> EndpointRegistry {
    let (scheme, tld) = match &config.proxy {
        Some(proxy) => {
            let tls = proxy.tls.as_ref().map(|t| t.enabled).unwrap_or(false);
            (if tls { "https" } else { "http" }, proxy.tld.as_str())
        }
        None => ("http", "localhost"),
    };

    let mut endpoints = BTreeMap::new();
    for (name, service) in &config.services {
        let Some(port) = service.port else {
            continue;
        };
        if service.mode == ServiceMode::Skip {
            continue;
        }
        let host_port = service.effective_host_port().unwrap_or(port);
        endpoints.insert(
            name.clone(),
            ServiceEndpoint {
                name: name.clone(),
                port,
                host_port,
                internal_url: format!("http://{}:{}", name, port),
                external_url: format!("http://localhost:{}", host_port),
                proxy_url: format!("{}://{}.{}.{}", scheme, name, config.name, tld),
                mode: service.mode,
            },
        );
    }

    EndpointRegistry { endpoints }
}

impl EndpointRegistry {
    /// Look up one service's endpoint
    pub fn get(&self, name: &str) -> Option<&ServiceEndpoint> {
        self.endpoints.get(name)
    }

    /// All registered endpoints, in name order
    pub fn iter(&self) -> impl Iterator<Item = &ServiceEndpoint> {
        self.endpoints.values()
    }

    /// Number of registered endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether no service is registered
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Discovery variables for every registered service:
    /// `LO1_SERVICE_<NAME>_{URL,PORT,PROXY_URL}`, with URL and PORT resolved
    /// for the consumer's vantage point.
    pub fn discovery_env(&self, consumer: ConsumerMode) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        for endpoint in self.endpoints.values() {
            let key = env_key(&endpoint.name);
            env.insert(
                format!("LO1_SERVICE_{}_URL", key),
                endpoint.url_for(consumer).to_string(),
            );
            env.insert(
                format!("LO1_SERVICE_{}_PORT", key),
                endpoint.port_for(consumer).to_string(),
            );
            env.insert(
                format!("LO1_SERVICE_{}_PROXY_URL", key),
                endpoint.proxy_url.clone(),
            );
        }
        env
    }

    /// Rewrite plugin-provided values for host consumers: every occurrence
    /// of `<service>:<port>` becomes `localhost:<hostPort>`.
    pub fn rewrite_for_host(&self, value: &str) -> String {
        let mut rewritten = value.to_string();
        for endpoint in self.endpoints.values() {
            let from = format!("{}:{}", endpoint.name, endpoint.port);
            let to = format!("localhost:{}", endpoint.host_port);
            rewritten = rewritten.replace(&from, &to);
        }
        rewritten
    }
}

/// Build the full environment for one service: discovery variables, plugin
/// variables (host-rewritten when appropriate), the service's own env (which
/// wins), and the reserved identity variables.
pub fn service_env(
    service_name: &str,
    service: &ServiceConfig,
    config: &WorkspaceConfig,
    registry: &EndpointRegistry,
    plugin_env: &BTreeMap<String, String>,
    consumer: ConsumerMode,
) -> BTreeMap<String, String> {
    let mut env = registry.discovery_env(consumer);

    for (key, value) in plugin_env {
        let value = match consumer {
            ConsumerMode::Host => registry.rewrite_for_host(value),
            ConsumerMode::Container => value.clone(),
        };
        env.insert(key.clone(), value);
    }

    for (key, value) in &service.env {
        env.insert(key.clone(), value.clone());
    }

    env.insert(ENV_SERVICE_NAME.to_string(), service_name.to_string());
    env.insert(ENV_WORKSPACE_NAME.to_string(), config.name.clone());

    env
}

fn env_key(service_name: &str) -> String {
    service_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
