use anyhow::{bail, Result};
use colored::Colorize;
use command_runner::{Command, CommandRunner};
use std::path::Path;

pub async fn run(workspace: &Path, config_path: &Path, fail_fast: bool) -> Result<()> {
    let config = lo1_config::parser::parse_file(config_path)?;
    if config.repositories.is_empty() {
        println!("no repositories declared in the manifest");
        return Ok(());
    }

    let runner = CommandRunner::new("init");
    let mut failures = Vec::new();

    for repository in &config.repositories {
        let target = workspace.join(&repository.path);
        if target.exists() {
            println!(
                "{} {} (already present)",
                "skip".dimmed(),
                repository.path
            );
            continue;
        }

        println!("{} {} -> {}", "clone".green(), repository.url, repository.path);
        let mut cmd = Command::new("git");
        cmd.arg("clone").arg(&repository.url).arg(&target);

        let failed = match runner.execute(cmd).await {
            Ok(result) if result.success() => None,
            Ok(result) => Some(result.stderr.trim().to_string()),
            Err(e) => Some(e.to_string()),
        };

        if let Some(message) = failed {
            if fail_fast {
                bail!("failed to clone {}: {}", repository.url, message);
            }
            eprintln!("{} {}: {}", "error:".red().bold(), repository.url, message);
            failures.push(repository.url.clone());
        }
    }

    if !failures.is_empty() {
        bail!("{} repositories failed to clone", failures.len());
    }
    Ok(())
}
