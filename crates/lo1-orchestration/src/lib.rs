//! # Orchestration engine
//!
//! Brings a declarative multi-service workspace up in dependency order and
//! tears it down cleanly. The engine validates the dependency graph, starts
//! compose-managed infrastructure with readiness gating, supervises host
//! processes and single containers, persists recovery state, and emits a
//! typed event stream consumed by the CLI.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lo1_orchestration::{
//!     cancel::CancelToken, events::EventBus, orchestrator::Orchestrator,
//!     orchestrator::StartOptions, plugins::PluginRegistry,
//! };
//!
//! # async fn example() -> lo1_orchestration::Result<()> {
//! let (events, _rx) = EventBus::new();
//! let orchestrator = Orchestrator::new(PluginRegistry::new(), events, CancelToken::new());
//! let started = orchestrator
//!     .start(StartOptions::new("/path/to/workspace"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod cancel;
pub mod compose_gen;
pub mod dag;
pub mod endpoints;
pub mod events;
pub mod filter;
pub mod hooks;
pub mod hosts;
pub mod names;
pub mod orchestrator;
pub mod plugins;
pub mod proxy;
pub mod readiness;
pub mod runners;
pub mod starter;
pub mod state;
pub mod tls;

pub use cancel::CancelToken;
pub use events::{EventBus, OrchestratorEvent, OutputLine, ServiceStatus};
pub use runners::ServiceHandle;

/// Error types for orchestration operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Manifest read/parse/validate failure
    #[error(transparent)]
    Config(#[from] lo1_config::ConfigError),

    /// A `dependsOn` entry names a service that does not exist
    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency {
        /// The service with the bad reference
        service: String,
        /// The name that could not be resolved
        dependency: String,
    },

    /// The dependency graph contains a cycle
    #[error("dependency cycle detected: {path}")]
    CycleDetected {
        /// The reconstructed cycle, rendered `a -> b -> a`
        path: String,
    },

    /// A service filter entry names an unknown service
    #[error("unknown service '{service}' in filter")]
    Filter {
        /// The name that could not be resolved
        service: String,
    },

    /// Plugin resolution or invocation failure
    #[error("plugin error: {message}")]
    Plugin {
        /// What went wrong
        message: String,
    },

    /// Compose document generation invariant violated
    #[error("compose generation failed: {message}")]
    Compose {
        /// What went wrong
        message: String,
    },

    /// The compose tool invocation failed
    #[error("compose invocation failed: {message}")]
    ComposeExec {
        /// What went wrong, including captured stderr where available
        message: String,
    },

    /// Host-process supervision failure
    #[error("process runner failed for '{service}': {message}")]
    ProcessRunner {
        /// The service being supervised
        service: String,
        /// What went wrong
        message: String,
    },

    /// Single-container supervision failure
    #[error("container runner failed for '{service}': {message}")]
    ContainerRunner {
        /// The service being supervised
        service: String,
        /// What went wrong
        message: String,
    },

    /// A readiness probe timed out or was cancelled
    #[error("service '{service}' did not become ready at {url}")]
    ReadinessProbe {
        /// The probed service
        service: String,
        /// The URL that never answered 2xx
        url: String,
    },

    /// A lifecycle hook failed
    #[error("hook '{hook}' failed with exit code {exit_code:?}")]
    Hook {
        /// The hook name, e.g. `preStart`
        hook: String,
        /// Exit code, or `None` when the hook could not be spawned
        exit_code: Option<i32>,
    },

    /// TLS trust installation failure
    #[error("TLS trust setup failed: {message}")]
    Tls {
        /// What went wrong
        message: String,
    },

    /// Hosts-file manipulation failure
    #[error("hosts file update failed: {message}")]
    Hosts {
        /// What went wrong
        message: String,
    },

    /// No runner could be determined for a service
    #[error("cannot start service '{service}': {message}")]
    ServiceStart {
        /// The service that could not be started
        service: String,
        /// Why no runner was selected
        message: String,
    },

    /// Orchestrator-level failure: abort, invalid plugin binding
    #[error("{message}")]
    Orchestrator {
        /// What went wrong
        message: String,
    },

    /// Subprocess layer error
    #[error(transparent)]
    Command(#[from] command_runner::Error),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization error
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Short machine-readable kind, used by the CLI's `--json` output
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::UnknownDependency { .. } | Error::CycleDetected { .. } => "DagError",
            Error::Filter { .. } => "FilterError",
            Error::Plugin { .. } => "PluginError",
            Error::Compose { .. } => "ComposeError",
            Error::ComposeExec { .. } => "ComposeExecError",
            Error::ProcessRunner { .. } => "ProcessRunnerError",
            Error::ContainerRunner { .. } => "ContainerRunnerError",
            Error::ReadinessProbe { .. } => "ReadinessProbeError",
            Error::Hook { .. } => "HookError",
            Error::Tls { .. } => "TlsError",
            Error::Hosts { .. } => "HostsError",
            Error::ServiceStart { .. } => "ServiceStartError",
            Error::Orchestrator { .. } => "OrchestratorError",
            Error::Command(_) => "ProcessRunnerError",
            Error::Io(_) => "IoError",
            Error::Json(_) | Error::Yaml(_) => "SerializationError",
        }
    }

    /// Create an orchestrator-level error
    pub fn orchestrator(message: impl Into<String>) -> Self {
        Self::Orchestrator {
            message: message.into(),
        }
    }
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;
