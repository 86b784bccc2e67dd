//! TLS trust helper
//!
//! Extracts the Caddy root certificate from the proxy container and
//! installs it into the host trust store. A content hash recorded next to
//! the certificate makes the install idempotent: matching hash, no
//! privileged operation.

use crate::names;
use crate::{Error, Result};
use command_runner::{Command, CommandRunner};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Path of the root certificate inside the Caddy container
const CADDY_ROOT_CERT: &str = "/data/caddy/pki/authorities/local/root.crt";

/// Hex SHA-256 fingerprint of certificate bytes
pub fn cert_fingerprint(cert: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cert);
    format!("{:x}", hasher.finalize())
}

/// Whether the certificate differs from the recorded fingerprint
pub fn needs_install(cert: &[u8], hash_path: &Path) -> bool {
    match std::fs::read_to_string(hash_path) {
        Ok(recorded) => recorded.trim() != cert_fingerprint(cert),
        Err(_) => true,
    }
}

/// Record the installed certificate's fingerprint
pub fn record_install(cert: &[u8], hash_path: &Path) -> Result<()> {
    std::fs::write(hash_path, cert_fingerprint(cert))?;
    Ok(())
}

fn cert_path(workspace_dir: &Path) -> PathBuf {
    workspace_dir
        .join(names::WORKSPACE_DIR_NAME)
        .join("caddy-root.crt")
}

fn hash_path(workspace_dir: &Path) -> PathBuf {
    workspace_dir
        .join(names::WORKSPACE_DIR_NAME)
        .join("caddy-root.crt.sha256")
}

/// Copy the proxy container's root certificate out and trust it on the
/// host. Skips the privileged install when the on-disk hash matches.
pub async fn trust_proxy_ca(proxy_container: &str, workspace_dir: &Path) -> Result<()> {
    let runner = CommandRunner::new("tls-helper");
    let cert = cert_path(workspace_dir);
    if let Some(parent) = cert.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut cp_cmd = Command::new("docker");
    cp_cmd
        .arg("cp")
        .arg(format!("{}:{}", proxy_container, CADDY_ROOT_CERT))
        .arg(&cert);
    let result = runner.execute(cp_cmd).await.map_err(|e| Error::Tls {
        message: format!("failed to run docker cp: {}", e),
    })?;
    if !result.success() {
        return Err(Error::Tls {
            message: format!(
                "cannot extract root certificate from '{}': {}",
                proxy_container,
                result.stderr.trim()
            ),
        });
    }

    let cert_bytes = std::fs::read(&cert)?;
    let hash = hash_path(workspace_dir);
    if !needs_install(&cert_bytes, &hash) {
        debug!("root certificate unchanged, trust store untouched");
        return Ok(());
    }

    info!("installing Caddy root certificate into the host trust store");
    install_cert(&runner, &cert).await?;
    record_install(&cert_bytes, &hash)?;
    Ok(())
}

#[cfg(target_os = "linux")]
async fn install_cert(runner: &CommandRunner, cert: &Path) -> Result<()> {
    let target = "/usr/local/share/ca-certificates/lo1-caddy-root.crt";

    let mut cp = privileged("cp");
    cp.arg(cert).arg(target);
    run_privileged(runner, cp).await?;

    let update = privileged("update-ca-certificates");
    run_privileged(runner, update).await
}

#[cfg(target_os = "macos")]
async fn install_cert(runner: &CommandRunner, cert: &Path) -> Result<()> {
    let mut cmd = privileged("security");
    cmd.args([
        "add-trusted-cert",
        "-d",
        "-r",
        "trustRoot",
        "-k",
        "/Library/Keychains/System.keychain",
    ])
    .arg(cert);
    run_privileged(runner, cmd).await
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
async fn install_cert(_runner: &CommandRunner, _cert: &Path) -> Result<()> {
    Err(Error::Tls {
        message: "automatic trust store installation is not supported on this platform".to_string(),
    })
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn privileged(program: &str) -> Command {
    if crate::hosts::is_root() {
        Command::new(program)
    } else {
        let mut cmd = Command::new("sudo");
        cmd.arg(program);
        cmd
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
async fn run_privileged(runner: &CommandRunner, cmd: Command) -> Result<()> {
    let result = runner.execute(cmd).await.map_err(|e| Error::Tls {
        message: format!("privileged command failed to run: {}", e),
    })?;
    if !result.success() {
        return Err(Error::Tls {
            message: format!("trust store update failed: {}", result.stderr.trim()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = cert_fingerprint(b"cert-bytes");
        let b = cert_fingerprint(b"cert-bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, cert_fingerprint(b"other-bytes"));
    }

    #[test]
    fn test_install_gate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let hash_path = dir.path().join("caddy-root.crt.sha256");
        let cert = b"-----BEGIN CERTIFICATE-----\nabc\n-----END CERTIFICATE-----\n";

        // First call installs and records.
        assert!(needs_install(cert, &hash_path));
        record_install(cert, &hash_path).unwrap();

        // Second call with the same certificate performs no install.
        assert!(!needs_install(cert, &hash_path));

        // A rotated certificate installs again.
        let rotated = b"different";
        assert!(needs_install(rotated, &hash_path));
    }
}
