use anyhow::Result;
use lo1_orchestration::{endpoints, hosts, proxy};
use std::path::Path;

pub async fn run(workspace: &Path, config_path: &Path, apply: bool, remove: bool) -> Result<()> {
    let _ = workspace;

    if remove {
        hosts::remove_applied_block().await?;
        println!("hosts block removed");
        return Ok(());
    }

    let config = lo1_config::parser::parse_file(config_path)?;
    let registry = endpoints::build(&config);
    let artifacts = proxy::generate(&config, &registry);
    let block = hosts::generate_hosts_block(&artifacts.domains);

    if block.is_empty() {
        println!("no proxied domains; nothing to write");
        return Ok(());
    }

    if apply {
        hosts::apply_hosts_block(&block).await?;
        println!("hosts block applied ({} domains)", artifacts.domains.len());
    } else {
        // Without --apply, show what would be written.
        print!("{}", block);
    }
    Ok(())
}
