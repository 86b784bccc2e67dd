use anyhow::Result;
use colored::Colorize;
use lo1_orchestration::runners::compose::ComposeRunner;
use lo1_orchestration::runners::RunnerKind;
use lo1_orchestration::state::StateStore;
use std::path::{Path, PathBuf};

pub async fn run(workspace: &Path, json: bool) -> Result<()> {
    let store = StateStore::new(workspace);
    let Some(state) = store.load()? else {
        if json {
            println!("{}", serde_json::json!({ "running": false }));
        } else {
            println!("No running workspace found");
        }
        return Ok(());
    };

    // Compose-managed services are resolved against the live project; a
    // missing daemon degrades to "unknown" rather than failing status.
    let compose = ComposeRunner::new(
        state.project_name.clone(),
        state.file_args.iter().map(PathBuf::from).collect(),
        &state.workspace_dir,
    );
    let ps = compose.ps().await.unwrap_or_default();

    let mut rows = Vec::new();
    for (name, entry) in &state.services {
        let status = match entry.runner {
            RunnerKind::Process => match entry.pid {
                Some(pid) if process_alive(pid) => "running".to_string(),
                Some(_) => "dead".to_string(),
                None => "unknown".to_string(),
            },
            RunnerKind::Container | RunnerKind::Compose => ps
                .iter()
                .find(|e| &e.service == name)
                .map(|e| e.state.clone())
                .unwrap_or_else(|| "unknown".to_string()),
        };
        rows.push((name.clone(), entry.runner, entry.pid, status));
    }

    if json {
        let services: Vec<serde_json::Value> = rows
            .iter()
            .map(|(name, runner, pid, status)| {
                serde_json::json!({
                    "service": name,
                    "runner": runner,
                    "pid": pid,
                    "status": status,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "running": true,
                "workspace": state.workspace_name,
                "project": state.project_name,
                "services": services,
            })
        );
        return Ok(());
    }

    println!(
        "workspace {} (project {})",
        state.workspace_name.bold(),
        state.project_name
    );
    println!("{:<20} {:<10} {:<8} {}", "SERVICE", "RUNNER", "PID", "STATUS");
    for (name, runner, pid, status) in rows {
        let runner = match runner {
            RunnerKind::Process => "process",
            RunnerKind::Container => "container",
            RunnerKind::Compose => "compose",
        };
        let pid = pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        let colored_status = match status.as_str() {
            "running" => status.green(),
            "dead" | "exited" => status.red(),
            _ => status.yellow(),
        };
        println!("{:<20} {:<10} {:<8} {}", name, runner, pid, colored_status);
    }
    Ok(())
}

fn process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
