use crate::commands::plugin_registry;
use crate::output;
use anyhow::Result;
use lo1_orchestration::cancel::CancelToken;
use lo1_orchestration::events::EventBus;
use lo1_orchestration::orchestrator::{Orchestrator, StopOptions};
use std::path::Path;

pub async fn run(workspace: &Path, config_path: &Path, json: bool, clean: bool) -> Result<()> {
    let (events, rx) = EventBus::new();
    let consumer = output::spawn_consumer(rx, json, workspace.join(".lo1/logs"));

    let orchestrator = Orchestrator::new(plugin_registry(), events, CancelToken::new());
    let mut opts = StopOptions::new(workspace);
    opts.config_path = Some(config_path.to_path_buf());
    opts.clean = clean;
    let outcome = orchestrator.stop(opts, None).await;

    drop(orchestrator);
    consumer.await;
    outcome?;
    Ok(())
}
