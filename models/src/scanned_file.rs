use std::path::{Path, PathBuf};

/// Group every host lands in when the caller does not name one.
pub const DEFAULT_GROUP: &str = "All";

/// The file being ingested. One per import call.
#[derive(Clone, Debug, PartialEq)]
pub struct ScannedFile {
    pub file_name: String,
    pub file_path: PathBuf,
    pub group_name: String,
}

impl ScannedFile {
    pub fn new(path: impl AsRef<Path>, group_name: Option<&str>) -> Self {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let group_name = group_name
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or(DEFAULT_GROUP);
        Self {
            file_name,
            file_path: path.to_path_buf(),
            group_name: group_name.to_string(),
        }
    }

    /// File name without its extension; used as a last-resort host name.
    pub fn stem(&self) -> String {
        self.file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_group_falls_back_to_default() {
        let file = ScannedFile::new("/tmp/scan.nessus", Some("  "));
        assert_eq!(file.group_name, DEFAULT_GROUP);
        assert_eq!(file.file_name, "scan.nessus");
        assert_eq!(file.stem(), "scan");
    }
}
