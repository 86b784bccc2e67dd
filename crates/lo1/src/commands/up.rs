use crate::commands::plugin_registry;
use crate::output;
use anyhow::{Context, Result};
use colored::Colorize;
use lo1_config::ServiceMode;
use lo1_orchestration::cancel::CancelToken;
use lo1_orchestration::events::EventBus;
use lo1_orchestration::orchestrator::{Orchestrator, StartOptions, StopOptions};
use std::path::Path;
use tracing::warn;

pub struct UpArgs {
    pub services: Option<Vec<String>>,
    pub mode: Option<ServiceMode>,
    pub detach: bool,
    pub skip_teardown: bool,
    pub clean: bool,
}

pub async fn run(workspace: &Path, config_path: &Path, json: bool, args: UpArgs) -> Result<()> {
    let (events, rx) = EventBus::new();
    let cancel = CancelToken::new();

    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())
            .context("failed to install Ctrl-C handler")?;
    }

    let consumer = output::spawn_consumer(rx, json, workspace.join(".lo1/logs"));
    let orchestrator = Orchestrator::new(plugin_registry(), events.clone(), cancel.clone());

    let mut opts = StartOptions::new(workspace);
    opts.config_path = Some(config_path.to_path_buf());
    opts.service_filter = args.services.clone();
    opts.mode_override = args.mode;

    let started = match orchestrator.start(opts).await {
        Ok(started) => started,
        Err(error) => {
            // A half-started stack is not leaked: fall through to teardown
            // with a fresh token so the cleanup itself cannot be cancelled.
            let stopper =
                Orchestrator::new(plugin_registry(), events.clone(), CancelToken::new());
            let mut stop_opts = StopOptions::new(workspace);
            stop_opts.config_path = Some(config_path.to_path_buf());
            stop_opts.clean = args.clean;
            if let Err(stop_error) = stopper.stop(stop_opts, None).await {
                warn!("teardown after failed start also failed: {}", stop_error);
            }
            return Err(error.into());
        }
    };

    if args.detach {
        if !json {
            println!("{} workspace is up, detaching", "==>".blue().bold());
        }
        // The handles own the service processes and would kill them on
        // drop; a detached up leaves them running for a later `lo1 down`.
        std::mem::forget(started);
        return Ok(());
    }

    if !json {
        println!("{} press Ctrl-C to stop", "==>".blue().bold());
    }
    cancel.cancelled().await;

    if args.skip_teardown {
        std::mem::forget(started);
        return Ok(());
    }

    if let Some(logs) = started.logs {
        logs.kill().await;
    }

    let stopper = Orchestrator::new(plugin_registry(), events, CancelToken::new());
    let mut stop_opts = StopOptions::new(workspace);
    stop_opts.config_path = Some(config_path.to_path_buf());
    stop_opts.clean = args.clean;
    stopper.stop(stop_opts, Some(started.handles)).await?;

    drop(orchestrator);
    drop(stopper);
    consumer.await;
    Ok(())
}
