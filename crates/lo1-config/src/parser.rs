//! Manifest parsing and validation

use crate::{ConfigError, Result, ServiceConfig, ServiceMode, WorkspaceConfig};
use std::path::Path;

/// Parse a `lo1.yaml` manifest file
pub fn parse_file(path: impl AsRef<Path>) -> Result<WorkspaceConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content)
}

/// Parse a manifest from a string
pub fn parse_str(content: &str) -> Result<WorkspaceConfig> {
    let config: WorkspaceConfig = serde_yaml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Validate a parsed manifest
pub fn validate(config: &WorkspaceConfig) -> Result<()> {
    if config.version != "1" {
        return Err(ConfigError::validation(
            "version",
            format!("unsupported version '{}', expected '1'", config.version),
        ));
    }

    if config.name.is_empty() {
        return Err(ConfigError::validation("name", "workspace name is empty"));
    }

    for (name, service) in &config.services {
        validate_service(config, name, service)?;
    }

    Ok(())
}

fn validate_service(config: &WorkspaceConfig, name: &str, service: &ServiceConfig) -> Result<()> {
    for dep in &service.depends_on {
        if !config.services.contains_key(dep) {
            return Err(ConfigError::validation(
                format!("services.{}.dependsOn", name),
                format!("unknown service '{}'", dep),
            ));
        }
    }

    // Plugin-typed services may get their runner configuration from the
    // plugin, so only builtin types can be checked for completeness here.
    let plugin_typed = !service.is_builtin_type();
    if plugin_typed && !config.plugins.contains_key(&service.service_type) {
        return Err(ConfigError::validation(
            format!("services.{}.type", name),
            format!(
                "type '{}' is not a builtin and no plugin of that name is declared",
                service.service_type
            ),
        ));
    }

    match service.mode {
        ServiceMode::Dev => {
            if !plugin_typed && service.command.is_none() {
                return Err(ConfigError::validation(
                    format!("services.{}.command", name),
                    "dev-mode service requires a command",
                ));
            }
        }
        ServiceMode::Container => {
            if !plugin_typed && service.container_image.is_none() && service.compose.is_none() {
                return Err(ConfigError::validation(
                    format!("services.{}", name),
                    "container-mode service requires containerImage or a compose file",
                ));
            }
        }
        ServiceMode::Skip => {}
    }

    if let Some(0) = service.port {
        return Err(ConfigError::validation(
            format!("services.{}.port", name),
            "port must be a positive integer",
        ));
    }
    if let Some(0) = service.host_port {
        return Err(ConfigError::validation(
            format!("services.{}.hostPort", name),
            "hostPort must be a positive integer",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
version: "1"
name: shop
services:
  api:
    path: services/api
    command: npm run dev
    port: 3000
    dependsOn: [db]
  db:
    mode: container
    containerImage: postgres:16
    port: 5432
"#;

    #[test]
    fn test_parse_minimal_manifest() {
        let config = parse_str(MINIMAL).unwrap();
        assert_eq!(config.version, "1");
        assert_eq!(config.name, "shop");
        assert_eq!(config.services.len(), 2);

        let api = &config.services["api"];
        assert_eq!(api.mode, ServiceMode::Dev);
        assert_eq!(api.depends_on, vec!["db"]);
        assert_eq!(api.effective_host_port(), Some(3000));
        assert!(!api.init_task);

        let db = &config.services["db"];
        assert_eq!(db.mode, ServiceMode::Container);
        assert_eq!(db.service_type, "service");
    }

    #[test]
    fn test_host_port_defaults_to_port() {
        let yaml = r#"
version: "1"
name: ws
services:
  web:
    command: serve
    port: 8080
    hostPort: 18080
"#;
        let config = parse_str(yaml).unwrap();
        assert_eq!(config.services["web"].effective_host_port(), Some(18080));
    }

    #[test]
    fn test_unsupported_version() {
        let yaml = r#"
version: "2"
name: ws
services: {}
"#;
        let err = parse_str(yaml).unwrap_err();
        match err {
            ConfigError::Validation { field, .. } => assert_eq!(field, "version"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_unknown_dependency_breadcrumb() {
        let yaml = r#"
version: "1"
name: ws
services:
  api:
    command: run
    dependsOn: [ghost]
"#;
        let err = parse_str(yaml).unwrap_err();
        match err {
            ConfigError::Validation { field, message } => {
                assert_eq!(field, "services.api.dependsOn");
                assert!(message.contains("ghost"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_dev_mode_requires_command() {
        let yaml = r#"
version: "1"
name: ws
services:
  api: {}
"#;
        let err = parse_str(yaml).unwrap_err();
        match err {
            ConfigError::Validation { field, .. } => assert_eq!(field, "services.api.command"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_container_mode_requires_image_or_compose() {
        let yaml = r#"
version: "1"
name: ws
services:
  db:
    mode: container
"#;
        assert!(parse_str(yaml).is_err());

        let yaml = r#"
version: "1"
name: ws
services:
  db:
    mode: container
    compose: services/db/compose.yaml
"#;
        assert!(parse_str(yaml).is_ok());
    }

    #[test]
    fn test_plugin_typed_service_needs_declared_plugin() {
        let yaml = r#"
version: "1"
name: ws
services:
  db:
    type: postgres
"#;
        assert!(parse_str(yaml).is_err());

        let yaml = r#"
version: "1"
name: ws
plugins:
  postgres: "@lo1/plugin-postgres"
services:
  db:
    type: postgres
"#;
        let config = parse_str(yaml).unwrap();
        assert!(!config.services["db"].is_builtin_type());
    }

    #[test]
    fn test_extra_compose_forms() {
        let yaml = r#"
version: "1"
name: ws
extraCompose: ./infra.yaml
services: {}
"#;
        let config = parse_str(yaml).unwrap();
        let extra = config.extra_compose.unwrap();
        assert_eq!(extra.file(), "./infra.yaml");
        assert!(extra.init_task_services().is_empty());

        let yaml = r#"
version: "1"
name: ws
extraCompose:
  file: ./infra.yaml
  initTaskServices: [migrator]
services: {}
"#;
        let config = parse_str(yaml).unwrap();
        let extra = config.extra_compose.unwrap();
        assert_eq!(extra.file(), "./infra.yaml");
        assert_eq!(extra.init_task_services(), ["migrator"]);
    }

    #[test]
    fn test_proxy_defaults() {
        let yaml = r#"
version: "1"
name: ws
proxy:
  tls:
    port: 8443
services: {}
"#;
        let config = parse_str(yaml).unwrap();
        let proxy = config.proxy.unwrap();
        assert!(proxy.enabled);
        assert_eq!(proxy.tld, "localhost");
        let tls = proxy.tls.unwrap();
        assert!(tls.enabled);
        assert_eq!(tls.port, Some(8443));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = parse_str(MINIMAL).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let reparsed = parse_str(&yaml).unwrap();
        assert_eq!(config, reparsed);
    }
}
