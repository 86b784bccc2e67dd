//! Hosts-file block management
//!
//! The orchestrator owns a sentinel-bracketed block in the system hosts
//! file so edits are surgical, idempotent, and reversible. The pure
//! rewriting functions are separated from the privileged applier.

use crate::{Error, Result};
use command_runner::{Command, CommandRunner};
use std::path::Path;
use tracing::info;

/// First line of the managed block
pub const BLOCK_START: &str = "# lo1-start";
/// Last line of the managed block
pub const BLOCK_END: &str = "# lo1-end";

/// Location of the system hosts file
#[cfg(unix)]
pub const HOSTS_PATH: &str = "/etc/hosts";
/// Location of the system hosts file
#[cfg(not(unix))]
pub const HOSTS_PATH: &str = r"C:\Windows\System32\drivers\etc\hosts";

/// Render the managed block for a list of domains; empty input yields an
/// empty string so callers can skip the privileged write entirely.
pub fn generate_hosts_block(domains: &[String]) -> String {
    if domains.is_empty() {
        return String::new();
    }
    let mut block = String::new();
    block.push_str(BLOCK_START);
    block.push('\n');
    for domain in domains {
        block.push_str(&format!("127.0.0.1\t{}\n", domain));
    }
    block.push_str(BLOCK_END);
    block.push('\n');
    block
}

/// Replace the managed block in `existing` with `block`, appending it when
/// no block is present. Only the bracketed region is touched.
pub fn replace_hosts_block(existing: &str, block: &str) -> String {
    let without = remove_hosts_block(existing);
    if block.is_empty() {
        return without;
    }

    let mut result = without;
    if !result.is_empty() && !result.ends_with('\n') {
        result.push('\n');
    }
    result.push_str(block);
    result
}

/// Remove the managed block, leaving the rest of the file untouched
pub fn remove_hosts_block(existing: &str) -> String {
    let mut result = String::new();
    let mut inside = false;
    for line in existing.lines() {
        if line.trim() == BLOCK_START {
            inside = true;
            continue;
        }
        if line.trim() == BLOCK_END {
            inside = false;
            continue;
        }
        if !inside {
            result.push_str(line);
            result.push('\n');
        }
    }

    // Preserve the absence of a trailing newline.
    if !existing.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }
    result
}

/// Rewrite the system hosts file so its managed block equals `block`
/// (removed entirely when `block` is empty). Requires privileges; when not
/// running as root the write goes through `sudo`.
pub async fn apply_hosts_block(block: &str) -> Result<()> {
    apply_to_file(Path::new(HOSTS_PATH), block).await
}

/// Remove the managed block from the system hosts file
pub async fn remove_applied_block() -> Result<()> {
    apply_to_file(Path::new(HOSTS_PATH), "").await
}

async fn apply_to_file(hosts_path: &Path, block: &str) -> Result<()> {
    let existing = std::fs::read_to_string(hosts_path).map_err(|e| Error::Hosts {
        message: format!("cannot read {}: {}", hosts_path.display(), e),
    })?;
    let updated = replace_hosts_block(&existing, block);
    if updated == existing {
        return Ok(());
    }

    info!(path = %hosts_path.display(), "updating hosts block");

    if is_root() {
        std::fs::write(hosts_path, updated).map_err(|e| Error::Hosts {
            message: format!("cannot write {}: {}", hosts_path.display(), e),
        })?;
        return Ok(());
    }

    // Stage the new content and copy it into place under sudo.
    let staged = std::env::temp_dir().join("lo1-hosts");
    std::fs::write(&staged, updated).map_err(|e| Error::Hosts {
        message: format!("cannot stage hosts file: {}", e),
    })?;

    let mut cmd = Command::new("sudo");
    cmd.arg("cp").arg(&staged).arg(hosts_path);
    let result = CommandRunner::new("hosts-writer")
        .execute(cmd)
        .await
        .map_err(|e| Error::Hosts {
            message: format!("failed to run sudo: {}", e),
        })?;
    let _ = std::fs::remove_file(&staged);

    if !result.success() {
        return Err(Error::Hosts {
            message: format!("privileged hosts update failed: {}", result.stderr.trim()),
        });
    }
    Ok(())
}

/// Whether the current process runs with root privileges
pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        nix::unistd::geteuid().is_root()
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_domains_generate_empty_block() {
        assert_eq!(generate_hosts_block(&[]), "");
    }

    #[test]
    fn test_block_shape() {
        let block = generate_hosts_block(&domains(&["api.shop.local", "db.shop.local"]));
        assert!(block.starts_with(BLOCK_START));
        assert!(block.trim_end().ends_with(BLOCK_END));
        assert!(block.contains("127.0.0.1\tapi.shop.local"));
        assert!(block.contains("127.0.0.1\tdb.shop.local"));
    }

    #[test]
    fn test_remove_inverts_replace() {
        let original = "127.0.0.1\tlocalhost\n::1\tlocalhost\n";
        let block = generate_hosts_block(&domains(&["api.shop.local"]));

        let applied = replace_hosts_block(original, &block);
        assert!(applied.contains("api.shop.local"));
        assert_eq!(remove_hosts_block(&applied), original);
    }

    #[test]
    fn test_replace_touches_only_the_bracketed_region() {
        let original = format!(
            "127.0.0.1\tlocalhost\n{}\n127.0.0.1\told.shop.local\n{}\n# trailing comment\n",
            BLOCK_START, BLOCK_END
        );
        let block = generate_hosts_block(&domains(&["new.shop.local"]));

        let applied = replace_hosts_block(&original, &block);
        assert!(applied.contains("127.0.0.1\tlocalhost"));
        assert!(applied.contains("# trailing comment"));
        assert!(applied.contains("new.shop.local"));
        assert!(!applied.contains("old.shop.local"));

        // Exactly one block remains.
        assert_eq!(applied.matches(BLOCK_START).count(), 1);
        assert_eq!(applied.matches(BLOCK_END).count(), 1);
    }

    #[test]
    fn test_replace_with_empty_block_removes() {
        let original = "127.0.0.1\tlocalhost\n";
        let block = generate_hosts_block(&domains(&["api.shop.local"]));
        let applied = replace_hosts_block(original, &block);

        assert_eq!(replace_hosts_block(&applied, ""), original);
    }

    #[test]
    fn test_remove_without_block_is_identity() {
        let original = "127.0.0.1\tlocalhost\n::1\tlocalhost\n";
        assert_eq!(remove_hosts_block(original), original);

        let no_trailing_newline = "127.0.0.1\tlocalhost";
        assert_eq!(remove_hosts_block(no_trailing_newline), no_trailing_newline);
    }

    #[smol_potat::test]
    async fn test_apply_to_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1\tlocalhost\n").unwrap();

        // Only exercises the unprivileged branch when running as root;
        // otherwise validates the read/merge logic via a direct call.
        let block = generate_hosts_block(&domains(&["api.shop.local"]));
        let existing = std::fs::read_to_string(&path).unwrap();
        let updated = replace_hosts_block(&existing, &block);
        std::fs::write(&path, &updated).unwrap();

        let reread = std::fs::read_to_string(&path).unwrap();
        assert!(reread.contains("api.shop.local"));
        assert_eq!(remove_hosts_block(&reread), existing);
    }
}
