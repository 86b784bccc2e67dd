//! Event formatting and the log-file sink
//!
//! The consumer task drains the orchestrator's event stream: it prints
//! phases, service transitions, and output lines (colored, or as JSON when
//! `--json` is active) and tees service output into `.lo1/logs/<service>.log`.

use anyhow::Error;
use colored::Colorize;
use command_runner::OutputStream;
use lo1_orchestration::events::{OrchestratorEvent, ServiceStatus};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

/// Spawn the event consumer. It runs until every sender is gone.
pub fn spawn_consumer(
    rx: async_channel::Receiver<OrchestratorEvent>,
    json: bool,
    log_dir: PathBuf,
) -> smol::Task<()> {
    smol::spawn(async move {
        let mut sink = LogSink::new(log_dir);
        while let Ok(event) = rx.recv().await {
            if let OrchestratorEvent::Output { line } = &event {
                sink.write(&line.service, &line.text);
            }
            if json {
                match serde_json::to_string(&event) {
                    Ok(rendered) => println!("{}", rendered),
                    Err(e) => warn!("cannot serialize event: {}", e),
                }
            } else {
                print_event(&event);
            }
        }
    })
}

fn print_event(event: &OrchestratorEvent) {
    match event {
        OrchestratorEvent::Phase { phase } => {
            println!("{} {}", "==>".blue().bold(), phase.bold());
        }
        OrchestratorEvent::Service { service, status } => {
            let status = match status {
                ServiceStatus::Starting => "starting".yellow(),
                ServiceStatus::Started => "started".green(),
                ServiceStatus::Stopping => "stopping".yellow(),
                ServiceStatus::Stopped => "stopped".dimmed(),
            };
            println!("{} {}", format!("[{}]", service).cyan(), status);
        }
        OrchestratorEvent::Hook { hook, output } => {
            println!("{} {}", format!("[{}]", hook).magenta(), output);
        }
        OrchestratorEvent::Output { line } => {
            let prefix = match line.stream {
                OutputStream::Stdout => format!("{} |", line.service).cyan(),
                OutputStream::Stderr => format!("{} |", line.service).yellow(),
            };
            println!("{} {}", prefix, line.text);
        }
        OrchestratorEvent::Error { message } => {
            eprintln!("{} {}", "error:".red().bold(), message);
        }
    }
}

/// Per-service append-only log files under `.lo1/logs/`
struct LogSink {
    log_dir: PathBuf,
    files: HashMap<String, File>,
    ready: bool,
}

impl LogSink {
    fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            files: HashMap::new(),
            ready: false,
        }
    }

    fn write(&mut self, service: &str, text: &str) {
        if !self.ready {
            if let Err(e) = std::fs::create_dir_all(&self.log_dir) {
                warn!("cannot create log directory: {}", e);
                return;
            }
            self.ready = true;
        }

        if !self.files.contains_key(service) {
            let path = self.log_dir.join(format!("{}.log", service));
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    self.files.insert(service.to_string(), file);
                }
                Err(e) => {
                    warn!("cannot open log file {}: {}", path.display(), e);
                    return;
                }
            }
        }

        if let Some(file) = self.files.get_mut(service) {
            let _ = writeln!(file, "{}", text);
        }
    }
}

/// Render an error as the `--json` error object
pub fn error_json(error: &Error) -> String {
    let kind = error
        .downcast_ref::<lo1_orchestration::Error>()
        .map(|e| e.kind())
        .or_else(|| {
            error
                .downcast_ref::<lo1_config::ConfigError>()
                .map(|_| "ConfigError")
        })
        .unwrap_or("Error");

    serde_json::json!({
        "error": kind,
        "message": error.to_string(),
    })
    .to_string()
}
