//! Service filter resolution
//!
//! Given the subset of services a user asked for, computes the transitive
//! closure over `dependsOn` so everything the subset needs is started too.

use crate::{Error, Result};
use lo1_config::WorkspaceConfig;
use std::collections::{BTreeSet, VecDeque};

/// Resolve the requested service set to its dependency closure.
///
/// The returned set is unordered; the dependency graph's layering supplies
/// start order. Requesting the full service set is the identity.
pub fn resolve(requested: &[String], config: &WorkspaceConfig) -> Result<BTreeSet<String>> {
    let mut closure = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    for name in requested {
        if !config.services.contains_key(name) {
            return Err(Error::Filter {
                service: name.clone(),
            });
        }
        queue.push_back(name);
    }

    while let Some(name) = queue.pop_front() {
        if !closure.insert(name.to_string()) {
            continue;
        }
        if let Some(service) = config.services.get(name) {
            for dep in &service.depends_on {
                queue.push_back(dep);
            }
        }
    }

    Ok(closure)
}

/// Restrict a config to the given closure, dropping everything else.
pub fn apply(config: &mut WorkspaceConfig, closure: &BTreeSet<String>) {
    config.services.retain(|name, _| closure.contains(name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use lo1_config::parser;

    fn config() -> WorkspaceConfig {
        parser::parse_str(
            r#"
version: "1"
name: ws
services:
  db:
    mode: container
    containerImage: postgres:16
  api:
    command: run api
    dependsOn: [db]
  web:
    command: run web
    dependsOn: [api]
  metrics:
    command: run metrics
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_closure_includes_transitive_dependencies() {
        let config = config();
        let closure = resolve(&["web".to_string()], &config).unwrap();
        let expected: BTreeSet<String> = ["web", "api", "db"].iter().map(|s| s.to_string()).collect();
        assert_eq!(closure, expected);
    }

    #[test]
    fn test_full_set_is_identity() {
        let config = config();
        let all: Vec<String> = config.services.keys().cloned().collect();
        let closure = resolve(&all, &config).unwrap();
        assert_eq!(closure.len(), config.services.len());
    }

    #[test]
    fn test_unknown_service() {
        let config = config();
        let err = resolve(&["ghost".to_string()], &config).unwrap_err();
        assert!(matches!(err, Error::Filter { service } if service == "ghost"));
    }

    #[test]
    fn test_apply_retains_only_closure() {
        let mut config = config();
        let closure = resolve(&["api".to_string()], &config).unwrap();
        apply(&mut config, &closure);

        assert!(config.services.contains_key("api"));
        assert!(config.services.contains_key("db"));
        assert!(!config.services.contains_key("web"));
        assert!(!config.services.contains_key("metrics"));
    }
}
