use anyhow::{bail, Result};
use colored::Colorize;
use std::path::Path;

pub async fn run(workspace: &Path, service: Option<String>, list: bool) -> Result<()> {
    let log_dir = workspace.join(".lo1/logs");
    if !log_dir.exists() {
        println!("no captured logs");
        return Ok(());
    }

    let mut services: Vec<String> = std::fs::read_dir(&log_dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.strip_suffix(".log").map(|s| s.to_string())
        })
        .collect();
    services.sort();

    if list {
        for service in services {
            println!("{}", service);
        }
        return Ok(());
    }

    let targets = match service {
        Some(service) => {
            if !services.contains(&service) {
                bail!("no captured logs for service '{}'", service);
            }
            vec![service]
        }
        None => services,
    };

    for (index, service) in targets.iter().enumerate() {
        if targets.len() > 1 {
            if index > 0 {
                println!();
            }
            println!("{}", format!("==> {} <==", service).cyan().bold());
        }
        let content = std::fs::read_to_string(log_dir.join(format!("{}.log", service)))?;
        print!("{}", content);
    }
    Ok(())
}
