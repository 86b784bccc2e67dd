//! Lifecycle hook execution
//!
//! Hooks are user-supplied shell snippets run at lifecycle points, with
//! their output captured onto the event bus line by line.

use crate::cancel::CancelToken;
use crate::events::EventBus;
use crate::{Error, Result};
use command_runner::{Command, CommandRunner, ProcessEvent};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Run one hook to completion.
///
/// The snippet runs through the platform shell from `cwd`, inheriting the
/// ambient environment unioned with `env` (supplied wins). Non-zero exit
/// fails with the hook's name and exit code; a spawn failure carries a
/// `None` exit code.
pub async fn execute_hook(
    hook_name: &str,
    command: &str,
    cwd: &Path,
    env: &BTreeMap<String, String>,
    cancel: &CancelToken,
    events: &EventBus,
) -> Result<()> {
    info!(hook = %hook_name, "running hook: {}", command);

    let mut cmd = Command::shell(command);
    cmd.current_dir(cwd);
    cmd.envs(env);

    let runner = CommandRunner::new("hook-executor");
    let (stream, mut handle) = runner.spawn(cmd).await.map_err(|_| Error::Hook {
        hook: hook_name.to_string(),
        exit_code: None,
    })?;

    let pump = {
        let events = events.clone();
        let hook = hook_name.to_string();
        smol::spawn(async move {
            let mut stream = stream;
            while let Some(event) = stream.next().await {
                if let ProcessEvent::Output(chunk) = event {
                    events.hook(hook.clone(), chunk.text);
                }
            }
        })
    };

    let status = smol::future::or(
        async { Some(handle.wait().await) },
        async {
            cancel.cancelled().await;
            None
        },
    )
    .await;

    match status {
        Some(status) => {
            pump.await;
            let status = status.map_err(|_| Error::Hook {
                hook: hook_name.to_string(),
                exit_code: None,
            })?;
            if !status.success() {
                return Err(Error::Hook {
                    hook: hook_name.to_string(),
                    exit_code: status.code,
                });
            }
            debug!(hook = %hook_name, "hook completed");
            Ok(())
        }
        None => {
            let _ = handle.stop(Duration::from_secs(5)).await;
            pump.cancel().await;
            Err(Error::orchestrator(format!(
                "hook '{}' aborted by cancellation",
                hook_name
            )))
        }
    }
}
