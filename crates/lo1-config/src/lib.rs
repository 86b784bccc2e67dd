//! # Workspace Configuration
//!
//! YAML manifest parser for lo1 workspaces.
//!
//! This crate parses `lo1.yaml` files into the immutable [`WorkspaceConfig`]
//! the orchestrator consumes, validating references and per-service
//! requirements up front so later phases can assume a well-formed model.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod parser;

/// Service types handled by the orchestrator itself; anything else must be
/// provided by a plugin.
pub const BUILTIN_SERVICE_TYPES: &[&str] = &["service", "app"];

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the manifest file
    #[error("failed to read manifest: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("failed to parse manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid configuration, with a field-path breadcrumb
    #[error("invalid configuration at {field}: {message}")]
    Validation {
        /// Dotted path to the offending field, e.g. `services.api.command`
        field: String,
        /// What is wrong with it
        message: String,
    },
}

impl ConfigError {
    /// Create a validation error with a field-path breadcrumb
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root workspace manifest, immutable after load
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Manifest schema version; must be the literal `"1"`
    pub version: String,

    /// Workspace name; scopes every generated resource
    pub name: String,

    /// Plugin type-name to specifier map
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, String>,

    /// Repositories cloned by `lo1 init`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<Repository>,

    /// Reverse-proxy configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,

    /// Extra compose file merged into the generated project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_compose: Option<ExtraCompose>,

    /// Workspace lifecycle hooks
    #[serde(default, skip_serializing_if = "WorkspaceHooks::is_empty")]
    pub hooks: WorkspaceHooks,

    /// Service definitions, keyed by service name
    pub services: BTreeMap<String, ServiceConfig>,
}

/// A repository cloned by `lo1 init`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Git URL
    pub url: String,
    /// Checkout path relative to the workspace
    pub path: String,
}

/// Reverse-proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Whether the proxy container is started
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Host port the proxy publishes plain HTTP on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Top-level domain for generated service hostnames
    #[serde(default = "default_tld")]
    pub tld: String,

    /// TLS termination settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

/// TLS settings for the reverse proxy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Whether TLS termination is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Host port the proxy publishes HTTPS on (defaults to 443)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Extra compose file reference: either a bare path or a detailed form that
/// also names its init-task services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ExtraCompose {
    /// Bare path to a compose file
    Path(String),
    /// Path plus init-task service names
    #[serde(rename_all = "camelCase")]
    Detailed {
        /// Path to the compose file
        file: String,
        /// Services in that file that must run to completion before
        /// dependents start
        #[serde(default)]
        init_task_services: Vec<String>,
    },
}

impl ExtraCompose {
    /// The compose file path
    pub fn file(&self) -> &str {
        match self {
            ExtraCompose::Path(p) => p,
            ExtraCompose::Detailed { file, .. } => file,
        }
    }

    /// Init-task service names declared for the file
    pub fn init_task_services(&self) -> &[String] {
        match self {
            ExtraCompose::Path(_) => &[],
            ExtraCompose::Detailed {
                init_task_services, ..
            } => init_task_services,
        }
    }
}

/// Workspace-level lifecycle hooks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceHooks {
    /// Runs after infrastructure containers are ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_infrastructure: Option<String>,

    /// Runs after every service layer has started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_setup: Option<String>,

    /// Runs before services are stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_stop: Option<String>,
}

impl WorkspaceHooks {
    fn is_empty(&self) -> bool {
        self == &WorkspaceHooks::default()
    }
}

/// Per-service lifecycle hooks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHooks {
    /// Runs before the service runner is spawned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_start: Option<String>,

    /// Runs after the service is up (and ready, if probed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_start: Option<String>,

    /// Runs before the service is stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_stop: Option<String>,
}

impl ServiceHooks {
    fn is_empty(&self) -> bool {
        self == &ServiceHooks::default()
    }
}

/// How a service is run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// Host process supervised directly
    #[default]
    Dev,
    /// Container managed through the compose project
    Container,
    /// Not started at all
    Skip,
}

/// Proxy routing overrides for one service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProxy {
    /// Explicit domain instead of `<service>.<workspace>.<tld>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Route only this path prefix to the service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
}

/// One service definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Service type: a builtin (`service`, `app`) or a plugin type name
    #[serde(rename = "type", default = "default_service_type")]
    pub service_type: String,

    /// Source directory relative to the workspace; hooks and host commands
    /// run from here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Port the service listens on inside its own network namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Host port the service is reachable on; defaults to `port`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,

    /// Execution mode
    #[serde(default)]
    pub mode: ServiceMode,

    /// Shell command for dev mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Image for container mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,

    /// Per-service compose file for container mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<String>,

    /// Environment variables handed to the service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Proxy routing overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ServiceProxy>,

    /// Lifecycle hooks
    #[serde(default, skip_serializing_if = "ServiceHooks::is_empty")]
    pub hooks: ServiceHooks,

    /// Names of services that must be started first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Whether the service must run to completion before dependents start
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub init_task: bool,

    /// URL polled until it answers 2xx before the service counts as started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ReadinessProbe>,
}

/// Readiness probe: a bare URL with default timing, or the detailed form
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ReadinessProbe {
    /// Poll this URL with default timing
    Url(String),
    /// Poll with explicit timing
    #[serde(rename_all = "camelCase")]
    Detailed {
        /// URL to poll
        url: String,
        /// Overall deadline in milliseconds
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        /// First retry interval in milliseconds
        #[serde(skip_serializing_if = "Option::is_none")]
        interval_ms: Option<u64>,
        /// Backoff multiplier applied after each failed attempt
        #[serde(skip_serializing_if = "Option::is_none")]
        backoff_multiplier: Option<f64>,
        /// Upper bound for the retry interval in milliseconds
        #[serde(skip_serializing_if = "Option::is_none")]
        max_interval_ms: Option<u64>,
    },
}

impl ReadinessProbe {
    /// The probed URL
    pub fn url(&self) -> &str {
        match self {
            ReadinessProbe::Url(url) => url,
            ReadinessProbe::Detailed { url, .. } => url,
        }
    }
}

impl ServiceConfig {
    /// Host port the service is reachable on, falling back to `port`
    pub fn effective_host_port(&self) -> Option<u16> {
        self.host_port.or(self.port)
    }

    /// Whether the service type is handled by the orchestrator itself
    pub fn is_builtin_type(&self) -> bool {
        BUILTIN_SERVICE_TYPES.contains(&self.service_type.as_str())
    }
}

fn default_true() -> bool {
    true
}

fn default_tld() -> String {
    "localhost".to_string()
}

fn default_service_type() -> String {
    "service".to_string()
}
