//! Persisted workspace state
//!
//! `<workspaceDir>/.lo1/state.json` is the crash-recovery record of the
//! current run. It is written once after infrastructure comes up (with an
//! empty service map so any later failure is recoverable), updated after
//! the service layers start, and removed on clean teardown.

use crate::names;
use crate::runners::{RunnerKind, ServiceHandle};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Recorded runner identity for one service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStateEntry {
    /// Which mechanism supervises the service
    pub runner: RunnerKind,
    /// Pid, for process runners
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Container id, for container runners
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

/// The persisted state of a running workspace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    /// Workspace name from the manifest
    pub workspace_name: String,
    /// Compose project name, `lo1-<workspace>`
    pub project_name: String,
    /// Ordered compose `-f` file list
    pub file_args: Vec<String>,
    /// Absolute workspace directory
    pub workspace_dir: PathBuf,
    /// Per-service runner identities
    pub services: BTreeMap<String, ServiceStateEntry>,
}

impl WorkspaceState {
    /// Baseline state written before any service starts
    pub fn baseline(
        workspace_name: impl Into<String>,
        file_args: Vec<String>,
        workspace_dir: impl Into<PathBuf>,
    ) -> Self {
        let workspace_name = workspace_name.into();
        Self {
            project_name: names::project_name(&workspace_name),
            workspace_name,
            file_args,
            workspace_dir: workspace_dir.into(),
            services: BTreeMap::new(),
        }
    }

    /// Record the runner identities of started handles
    pub fn record_handles(&mut self, handles: &[Arc<ServiceHandle>]) {
        for handle in handles {
            self.services.insert(
                handle.service_name().to_string(),
                ServiceStateEntry {
                    runner: handle.kind(),
                    pid: handle.pid(),
                    container_id: handle.container_id().map(|s| s.to_string()),
                },
            );
        }
    }

    /// Rehydrate stop-tokens from the recorded identities
    pub fn hydrate_handles(&self) -> Vec<Arc<ServiceHandle>> {
        self.services
            .iter()
            .map(|(name, entry)| {
                let handle = match entry.runner {
                    RunnerKind::Process => match entry.pid {
                        Some(pid) => ServiceHandle::detached_process(name.clone(), pid),
                        None => ServiceHandle::compose(name.clone()),
                    },
                    RunnerKind::Container => ServiceHandle::detached_container(
                        name.clone(),
                        names::container_name(&self.workspace_name, name),
                        entry.container_id.clone(),
                    ),
                    RunnerKind::Compose => ServiceHandle::compose(name.clone()),
                };
                Arc::new(handle)
            })
            .collect()
    }
}

/// Reads and writes the state file for one workspace
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store for `<workspace_dir>/.lo1/state.json`
    pub fn new(workspace_dir: impl AsRef<Path>) -> Self {
        Self {
            path: workspace_dir
                .as_ref()
                .join(names::WORKSPACE_DIR_NAME)
                .join("state.json"),
        }
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, `None` when no run is recorded
    pub fn load(&self) -> Result<Option<WorkspaceState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&content)?;
        Ok(Some(state))
    }

    /// Write the state, creating `.lo1/` as needed
    pub fn save(&self, state: &WorkspaceState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }

    /// Remove the state file; absent is fine
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load().unwrap().is_none());

        let mut state = WorkspaceState::baseline(
            "shop",
            vec![".lo1/compose.generated.yaml".to_string()],
            dir.path(),
        );
        state.services.insert(
            "api".to_string(),
            ServiceStateEntry {
                runner: RunnerKind::Process,
                pid: Some(4242),
                container_id: None,
            },
        );

        store.save(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.project_name, "lo1-shop");

        store.remove().unwrap();
        assert!(store.load().unwrap().is_none());
        // Removing again is fine.
        store.remove().unwrap();
    }

    #[test]
    fn test_state_json_is_pretty_and_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = WorkspaceState::baseline("shop", vec![], dir.path());
        store.save(&state).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains('\n'));
        assert!(raw.contains("\"workspaceName\""));
        assert!(raw.contains("\"projectName\""));
    }

    #[test]
    fn test_hydrate_handles() {
        let mut state = WorkspaceState::baseline("shop", vec![], "/tmp/ws");
        state.services.insert(
            "api".to_string(),
            ServiceStateEntry {
                runner: RunnerKind::Process,
                pid: Some(1234),
                container_id: None,
            },
        );
        state.services.insert(
            "db".to_string(),
            ServiceStateEntry {
                runner: RunnerKind::Compose,
                pid: None,
                container_id: None,
            },
        );
        state.services.insert(
            "cache".to_string(),
            ServiceStateEntry {
                runner: RunnerKind::Container,
                pid: None,
                container_id: Some("abc123".to_string()),
            },
        );

        let handles = state.hydrate_handles();
        assert_eq!(handles.len(), 3);

        let api = handles.iter().find(|h| h.service_name() == "api").unwrap();
        assert_eq!(api.kind(), RunnerKind::Process);
        assert_eq!(api.pid(), Some(1234));

        let cache = handles.iter().find(|h| h.service_name() == "cache").unwrap();
        assert_eq!(cache.kind(), RunnerKind::Container);
        assert_eq!(cache.container_id(), Some("abc123"));
    }
}
