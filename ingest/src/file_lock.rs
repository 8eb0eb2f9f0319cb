use std::fs::{File, TryLockError};
use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;

/// Whether another process holds `path` open exclusively.
///
/// A missing file is not "in use"; the reader reports it when opening.
pub fn is_file_in_use(path: &Path) -> bool {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return false,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "unable to open file");
            return true;
        }
    };

    match file.try_lock() {
        Ok(()) => false,
        Err(TryLockError::WouldBlock) => true,
        // Filesystems without lock support
        Err(TryLockError::Error(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_free_file_is_not_in_use() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scan.nessus");
        fs::write(&path, "<NessusClientData_v2/>").unwrap();
        assert!(!is_file_in_use(&path));
    }

    #[test]
    fn test_missing_file_is_not_in_use() {
        let tmp = TempDir::new().unwrap();
        assert!(!is_file_in_use(&tmp.path().join("absent.ckl")));
    }

    #[test]
    fn test_locked_file_is_in_use() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("locked.ckl");
        fs::write(&path, "<CHECKLIST/>").unwrap();
        let holder = File::open(&path).unwrap();
        holder.lock().unwrap();
        assert!(is_file_in_use(&path));
    }
}
