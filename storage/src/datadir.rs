use std::fs;
use std::path::{Path, PathBuf};

use crate::db::Database;
use crate::error::{Result, StorageError};

/// Default directory name inside the user's home.
const DEFAULT_DIR_NAME: &str = ".scanmerge";

/// Environment variable overriding the data directory.
const DIR_ENV: &str = "SCANMERGE_DIR";

/// File name of the findings store inside the data directory.
const DB_FILE: &str = "scanmerge.db";

/// The directory where scanmerge keeps its findings store.
///
/// ```text
/// ~/.scanmerge/
/// └── scanmerge.db
/// ```
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from `SCANMERGE_DIR`, falling back to
    /// `$HOME/.scanmerge`, and create it if needed.
    pub fn init() -> Result<Self> {
        Self::init_at(Self::resolve_root()?)
    }

    /// Create a `DataDir` rooted at an explicit path (useful for tests).
    pub fn init_at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Open (or create) the findings store inside the directory.
    pub fn open_db(&self) -> Result<Database> {
        Database::open(self.db_path())
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_root() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(DIR_ENV) {
            if !dir.trim().is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }

        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| StorageError::NoDataDir)?;

        Ok(home.join(DEFAULT_DIR_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_at_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nested").join("data");
        let dir = DataDir::init_at(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(dir.root(), root.as_path());
        assert_eq!(dir.db_path(), root.join("scanmerge.db"));
    }

    #[test]
    fn test_open_db_creates_store() {
        let tmp = TempDir::new().unwrap();
        let dir = DataDir::init_at(tmp.path()).unwrap();
        dir.open_db().unwrap();
        assert!(dir.db_path().exists());
    }
}
