//! SQLite file helpers for the project cache.
//!
//! - Cache directory creation with owner-only permissions
//! - Stable per-scope database file names

use anyhow::{Context, Result};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::Path;
use url::Url;

/// Open a SQLite database at `path`, creating the parent directory with
/// owner-only permissions when it does not exist yet.
pub(crate) fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    Connection::open(path).with_context(|| format!("Failed to open database at {}", path.display()))
}

/// Ensure a directory exists; on Unix tighten group/other access away.
pub(crate) fn ensure_private_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to read directory metadata: {}", path.display()))?;
        let current_mode = metadata.permissions().mode() & 0o777;
        if current_mode & 0o077 != 0 {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).with_context(
                || format!("Failed to set directory permissions: {}", path.display()),
            )?;
        }
    }
    Ok(())
}

/// Database file name for a scope: a truncated SHA-256 of the scope URI.
#[must_use]
pub fn cache_file_name(scope: &Url) -> String {
    let digest = Sha256::digest(scope.as_str().as_bytes());
    let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{hex}.sqlite")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_file_name_is_stable_and_distinct() {
        let a = Url::parse("file:///work/a/").unwrap();
        let b = Url::parse("file:///work/b/").unwrap();
        assert_eq!(cache_file_name(&a), cache_file_name(&a));
        assert_ne!(cache_file_name(&a), cache_file_name(&b));
        assert_eq!(cache_file_name(&a).len(), 16 + ".sqlite".len());
    }

    #[cfg(unix)]
    #[test]
    fn private_dir_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("cache");
        ensure_private_dir(&dir).unwrap();
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & 0o077, 0);
    }
}
