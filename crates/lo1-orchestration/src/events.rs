//! In-process orchestration event stream
//!
//! Events are delivered over a channel to a consumer task the caller runs
//! (the CLI prints them and sinks service output to log files). Emitting
//! never blocks the orchestrator: when the consumer falls behind, `Output`
//! events are shed, but phase, service, hook, and error events are always
//! delivered.

use chrono::{DateTime, Utc};
use command_runner::{OutputChunk, OutputStream};
use serde::Serialize;

/// How many undelivered events may pile up before `Output` events are shed
const OUTPUT_HIGH_WATER: usize = 1024;

/// One line of output from a service or hook
#[derive(Debug, Clone, Serialize)]
pub struct OutputLine {
    /// The service (or compose service) that produced the line
    pub service: String,
    /// Which pipe produced it
    pub stream: OutputStream,
    /// The line text
    pub text: String,
    /// When it was read
    pub timestamp: DateTime<Utc>,
}

impl OutputLine {
    /// Attribute a raw output chunk to a service
    pub fn from_chunk(service: impl Into<String>, chunk: OutputChunk) -> Self {
        Self {
            service: service.into(),
            stream: chunk.stream,
            text: chunk.text,
            timestamp: chunk.timestamp,
        }
    }
}

/// Lifecycle status of a service, as reported on the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Start requested, runner not yet up
    Starting,
    /// Runner up (and ready, if probed)
    Started,
    /// Stop requested
    Stopping,
    /// Runner gone
    Stopped,
}

/// A typed orchestration event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OrchestratorEvent {
    /// A new orchestration phase began
    Phase {
        /// Human-readable phase label
        phase: String,
    },
    /// A service changed lifecycle status
    Service {
        /// The service name
        service: String,
        /// Its new status
        status: ServiceStatus,
    },
    /// A lifecycle hook produced a line of output
    Hook {
        /// The hook name, e.g. `postInfrastructure`
        hook: String,
        /// One line of hook output
        output: String,
    },
    /// A service produced a line of output
    Output {
        /// The attributed line
        line: OutputLine,
    },
    /// A non-fatal error was observed
    Error {
        /// Description of the error
        message: String,
    },
}

/// Sender half of the event stream
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: async_channel::Sender<OrchestratorEvent>,
}

impl EventBus {
    /// Create a bus and the receiver the consumer task drains
    pub fn new() -> (Self, async_channel::Receiver<OrchestratorEvent>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }

    /// Emit an event. Never blocks; sheds `Output` events past the
    /// high-water mark and silently drops everything once the receiver is
    /// gone.
    pub fn emit(&self, event: OrchestratorEvent) {
        if matches!(event, OrchestratorEvent::Output { .. }) && self.tx.len() > OUTPUT_HIGH_WATER {
            return;
        }
        let _ = self.tx.try_send(event);
    }

    /// Emit a phase event
    pub fn phase(&self, phase: impl Into<String>) {
        self.emit(OrchestratorEvent::Phase {
            phase: phase.into(),
        });
    }

    /// Emit a service status event
    pub fn service(&self, service: impl Into<String>, status: ServiceStatus) {
        self.emit(OrchestratorEvent::Service {
            service: service.into(),
            status,
        });
    }

    /// Emit a hook output event
    pub fn hook(&self, hook: impl Into<String>, output: impl Into<String>) {
        self.emit(OrchestratorEvent::Hook {
            hook: hook.into(),
            output: output.into(),
        });
    }

    /// Emit a service output line
    pub fn output(&self, line: OutputLine) {
        self.emit(OrchestratorEvent::Output { line });
    }

    /// Emit an error event
    pub fn error(&self, message: impl Into<String>) {
        self.emit(OrchestratorEvent::Error {
            message: message.into(),
        });
    }
}
