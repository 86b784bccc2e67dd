use anyhow::Result;
use lo1_orchestration::{names, tls};
use std::path::Path;

pub async fn run(workspace: &Path, config_path: &Path) -> Result<()> {
    let config = lo1_config::parser::parse_file(config_path)?;
    let container = format!("{}-proxy", names::project_name(&config.name));
    tls::trust_proxy_ca(&container, workspace).await?;
    println!("root certificate trusted");
    Ok(())
}
