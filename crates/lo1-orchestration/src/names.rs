//! Deterministic names for workspace-scoped resources
//!
//! Everything the orchestrator creates on the container daemon is scoped by
//! the workspace name so concurrent workspaces never collide.

/// Compose project name: `lo1-<workspace>`
pub fn project_name(workspace: &str) -> String {
    format!("lo1-{}", workspace)
}

/// Bridge network name: `lo1-<workspace>-network`
pub fn network_name(workspace: &str) -> String {
    format!("lo1-{}-network", workspace)
}

/// Reverse-proxy service name: `lo1-<workspace>-proxy`
pub fn proxy_service_name(workspace: &str) -> String {
    format!("lo1-{}-proxy", workspace)
}

/// Single-container service name: `lo1-<workspace>-<service>`
pub fn container_name(workspace: &str, service: &str) -> String {
    format!("lo1-{}-{}", workspace, service)
}

/// Directory under the workspace owned by the orchestrator
pub const WORKSPACE_DIR_NAME: &str = ".lo1";
