//! Reverse-proxy configuration generation
//!
//! Emits a Caddyfile routing every registered service through the workspace
//! proxy container, plus the list of domains the hosts-file block needs.

use crate::endpoints::EndpointRegistry;
use crate::names;
use lo1_config::{ServiceMode, WorkspaceConfig};
use std::path::{Path, PathBuf};

/// Generated proxy configuration
#[derive(Debug, Clone, Default)]
pub struct ProxyArtifacts {
    /// The Caddyfile text; empty when the proxy is disabled
    pub caddyfile: String,
    /// Domains routed by the proxy, for the hosts block
    pub domains: Vec<String>,
}

/// Where the Caddyfile is written
pub fn caddyfile_path(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(names::WORKSPACE_DIR_NAME).join("Caddyfile")
}

/// Generate the Caddyfile and domain list for a workspace
pub fn generate(config: &WorkspaceConfig, registry: &EndpointRegistry) -> ProxyArtifacts {
    let Some(proxy) = &config.proxy else {
        return ProxyArtifacts::default();
    };
    if !proxy.enabled {
        return ProxyArtifacts::default();
    }

    let tls = proxy.tls.as_ref().map(|t| t.enabled).unwrap_or(false);
    let mut caddyfile = String::new();
    if tls {
        caddyfile.push_str("{\n\tlocal_certs\n}\n");
    } else {
        caddyfile.push_str("{\n\tauto_https off\n}\n");
    }

    let mut domains = Vec::new();
    for endpoint in registry.iter() {
        let service = &config.services[&endpoint.name];
        let domain = service
            .proxy
            .as_ref()
            .and_then(|p| p.domain.clone())
            .unwrap_or_else(|| format!("{}.{}.{}", endpoint.name, config.name, proxy.tld));

        // The proxy runs inside the workspace network; host-mode services
        // are reachable only through the host gateway.
        let upstream = match endpoint.mode {
            ServiceMode::Container => format!("{}:{}", endpoint.name, endpoint.port),
            _ => format!("host.docker.internal:{}", endpoint.host_port),
        };

        let address = if tls {
            domain.clone()
        } else {
            format!("http://{}", domain)
        };

        caddyfile.push_str("\n");
        caddyfile.push_str(&address);
        caddyfile.push_str(" {\n");
        match service.proxy.as_ref().and_then(|p| p.path_prefix.as_deref()) {
            Some(prefix) => {
                caddyfile.push_str(&format!("\thandle_path {}/* {{\n", prefix));
                caddyfile.push_str(&format!("\t\treverse_proxy {}\n", upstream));
                caddyfile.push_str("\t}\n");
            }
            None => {
                caddyfile.push_str(&format!("\treverse_proxy {}\n", upstream));
            }
        }
        caddyfile.push_str("}\n");

        domains.push(domain);
    }

    ProxyArtifacts { caddyfile, domains }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints;
    use lo1_config::parser;

    fn artifacts(yaml: &str) -> ProxyArtifacts {
        let config = parser::parse_str(yaml).unwrap();
        let registry = endpoints::build(&config);
        generate(&config, &registry)
    }

    #[test]
    fn test_disabled_proxy_generates_nothing() {
        let artifacts = artifacts(
            r#"
version: "1"
name: shop
services:
  api:
    command: run
    port: 3000
"#,
        );
        assert!(artifacts.caddyfile.is_empty());
        assert!(artifacts.domains.is_empty());
    }

    #[test]
    fn test_http_routing() {
        let artifacts = artifacts(
            r#"
version: "1"
name: shop
proxy:
  tld: local
services:
  api:
    command: run
    port: 3000
  db:
    mode: container
    containerImage: postgres:16
    port: 5432
"#,
        );

        assert!(artifacts.caddyfile.contains("auto_https off"));
        // Host-mode upstream goes through the host gateway.
        assert!(artifacts.caddyfile.contains("http://api.shop.local {"));
        assert!(artifacts
            .caddyfile
            .contains("reverse_proxy host.docker.internal:3000"));
        // Container-mode upstream is addressed by service name.
        assert!(artifacts.caddyfile.contains("reverse_proxy db:5432"));

        assert_eq!(artifacts.domains, vec!["api.shop.local", "db.shop.local"]);
    }

    #[test]
    fn test_tls_uses_local_certs() {
        let artifacts = artifacts(
            r#"
version: "1"
name: shop
proxy:
  tld: local
  tls: {}
services:
  api:
    command: run
    port: 3000
"#,
        );
        assert!(artifacts.caddyfile.contains("local_certs"));
        assert!(artifacts.caddyfile.contains("\napi.shop.local {"));
        assert!(!artifacts.caddyfile.contains("http://api.shop.local"));
    }

    #[test]
    fn test_domain_override_and_path_prefix() {
        let artifacts = artifacts(
            r#"
version: "1"
name: shop
proxy:
  tld: local
services:
  api:
    command: run
    port: 3000
    proxy:
      domain: api.example.test
      pathPrefix: /v1
"#,
        );

        assert_eq!(artifacts.domains, vec!["api.example.test"]);
        assert!(artifacts.caddyfile.contains("handle_path /v1/* {"));
    }
}
