//! Path helpers for configured store locations.

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

/// Expand a leading `~` to the current user's home directory.
///
/// Only the bare `~` component is expanded; `~user` forms are left alone.
pub fn expand_home(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir().context("Cannot expand '~': no home directory")?;
            Ok(if rest.as_os_str().is_empty() {
                home
            } else {
                home.join(rest)
            })
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Resolve `path` against the current directory if it is relative.
///
/// The path does not need to exist.
pub fn absolutize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = expand_home(path)?;
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    Ok(cwd.join(path))
}

/// Reject paths that climb out of their base with `..`.
pub fn ensure_no_parent_refs(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.components().any(|c| c == Component::ParentDir) {
        anyhow::bail!("Path must not contain '..': {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home("~").unwrap(), home);
        assert_eq!(
            expand_home("~/.strata/store").unwrap(),
            home.join(".strata/store")
        );
    }

    #[test]
    fn test_expand_home_leaves_other_paths() {
        assert_eq!(expand_home("/srv/strata").unwrap(), PathBuf::from("/srv/strata"));
        assert_eq!(expand_home("~alice/x").unwrap(), PathBuf::from("~alice/x"));
        assert_eq!(expand_home("data/~").unwrap(), PathBuf::from("data/~"));
    }

    #[test]
    fn test_absolutize_relative_path() {
        let abs = absolutize("store").unwrap();
        assert!(abs.is_absolute());
        assert!(abs.ends_with("store"));
    }

    #[test]
    fn test_ensure_no_parent_refs() {
        assert!(ensure_no_parent_refs("/srv/strata").is_ok());
        assert!(ensure_no_parent_refs("/srv/../etc").is_err());
    }
}
