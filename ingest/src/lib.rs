//! Readers that merge ACAS, CKL and WASSP scan results into the findings store.

mod acas;
mod ckl;
mod error;
mod file_lock;
mod normalize;
mod settings;
mod wassp;
mod xml;

use std::fmt;
use std::path::Path;

use models::ScannedFile;
use storage::Database;
use tracing::{error, info};

pub use acas::{ACAS_SECONDARY_IDENTIFIER, ACAS_SOURCE_NAME};
pub use ckl::{obtain_identifiers, scan_identifiers, CklIdentifiers};
pub use error::{IngestError, Result};
pub use file_lock::is_file_in_use;
pub use normalize::{sanitize_source, to_raw_risk, to_status};
pub use settings::Settings;
pub use wassp::{HtmlToXml, PassthroughConverter, WASSP_SOURCE_NAME};

/// What happened to one input file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Processed,
    FileInUse,
    Failed,
}

impl ReadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadOutcome::Processed => "Processed",
            ReadOutcome::FileInUse => "Failed; File In Use",
            ReadOutcome::Failed => "Failed; See Log",
        }
    }

    pub fn is_processed(&self) -> bool {
        *self == ReadOutcome::Processed
    }
}

impl fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scan result formats, chosen from the file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Acas,
    Ckl,
    Wassp,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        match extension.as_str() {
            "nessus" => Some(FileKind::Acas),
            "ckl" => Some(FileKind::Ckl),
            "html" | "htm" | "xml" => Some(FileKind::Wassp),
            _ => None,
        }
    }
}

/// Import any supported file, dispatching on its extension.
pub fn read_file(db: &mut Database, file: &ScannedFile, settings: &Settings) -> ReadOutcome {
    match FileKind::from_path(&file.file_path) {
        Some(FileKind::Acas) => read_acas_file(db, file, settings),
        Some(FileKind::Ckl) => read_ckl_file(db, file),
        Some(FileKind::Wassp) => read_wassp_file(db, file, &PassthroughConverter),
        None => {
            let err = IngestError::UnsupportedFile(file.file_name.clone());
            error!(file = %file.file_name, error = %err, "unable to process file");
            ReadOutcome::Failed
        }
    }
}

pub fn read_acas_file(db: &mut Database, file: &ScannedFile, settings: &Settings) -> ReadOutcome {
    run(file, "ACAS", || acas::import(db, file, settings))
}

pub fn read_ckl_file(db: &mut Database, file: &ScannedFile) -> ReadOutcome {
    run(file, "CKL", || ckl::import(db, file))
}

pub fn read_wassp_file(
    db: &mut Database,
    file: &ScannedFile,
    converter: &dyn HtmlToXml,
) -> ReadOutcome {
    run(file, "WASSP", || wassp::import(db, file, converter))
}

/// Reject locked files up front, then run the import and fold its result
/// into an outcome. Errors were already logged where they happened.
fn run(file: &ScannedFile, kind: &str, import: impl FnOnce() -> Result<()>) -> ReadOutcome {
    if is_file_in_use(&file.file_path) {
        error!(file = %file.file_name, kind, "file is in use; close any open instances and try again");
        return ReadOutcome::FileInUse;
    }

    match import() {
        Ok(()) => {
            info!(file = %file.file_name, kind, "file processed");
            ReadOutcome::Processed
        }
        Err(err) => {
            error!(file = %file.file_name, kind, error = %err, "unable to process file");
            ReadOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use storage::FindingFilter;
    use tempfile::TempDir;

    #[test]
    fn test_outcome_display() {
        assert_eq!(ReadOutcome::Processed.to_string(), "Processed");
        assert_eq!(ReadOutcome::FileInUse.to_string(), "Failed; File In Use");
        assert_eq!(ReadOutcome::Failed.to_string(), "Failed; See Log");
    }

    #[test]
    fn test_file_kind_from_extension() {
        assert_eq!(FileKind::from_path(Path::new("a/scan.NESSUS")), Some(FileKind::Acas));
        assert_eq!(FileKind::from_path(Path::new("web01.ckl")), Some(FileKind::Ckl));
        assert_eq!(FileKind::from_path(Path::new("report.htm")), Some(FileKind::Wassp));
        assert_eq!(FileKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(FileKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_unsupported_file_fails() {
        let tmp = TempDir::new().unwrap();
        let path: PathBuf = tmp.path().join("notes.txt");
        fs::write(&path, "nothing to see").unwrap();
        let mut db = Database::open_in_memory().unwrap();

        let outcome = read_file(&mut db, &ScannedFile::new(path, None), &Settings::default());
        assert_eq!(outcome, ReadOutcome::Failed);
    }

    #[test]
    fn test_broken_document_reports_see_log() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.ckl");
        fs::write(&path, "<CHECKLIST><ASSET><HOST_NAME>web01</HOST_NAME>").unwrap();
        let mut db = Database::open_in_memory().unwrap();

        let outcome = read_file(&mut db, &ScannedFile::new(path, None), &Settings::default());
        assert_eq!(outcome, ReadOutcome::Failed);
        assert!(db.findings(&FindingFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_processes_nessus() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.nessus");
        fs::write(&path, "<NessusClientData_v2><Report name=\"x\"/></NessusClientData_v2>").unwrap();
        let mut db = Database::open_in_memory().unwrap();

        let outcome = read_file(&mut db, &ScannedFile::new(path, None), &Settings::default());
        assert!(outcome.is_processed());
    }
}
