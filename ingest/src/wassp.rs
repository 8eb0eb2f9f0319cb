//! Windows Automated Security Scanning Program (WASSP) report reader.
//!
//! WASSP publishes HTML; an [`HtmlToXml`] converter turns it into a
//! well-formed document first. Each `table` of the report is one finding.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use models::{FindingType, Host, ScannedFile, Status, UniqueFinding, Vulnerability, VulnerabilitySource};
use storage::{Database, ImportSession};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

use crate::error::{IngestError, Result};
use crate::normalize;
use crate::xml::{XmlCursor, XmlNode};

pub const WASSP_SOURCE_NAME: &str = "Windows Automated Security Scanning Program (WASSP)";

/// Turns a WASSP HTML report into an XML file the cursor can read.
/// The returned file is owned by the reader and deleted after the import.
pub trait HtmlToXml {
    fn convert(&self, source: &Path) -> Result<PathBuf>;
}

/// Copies already well-formed XHTML into an intermediate file unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughConverter;

impl HtmlToXml for PassthroughConverter {
    fn convert(&self, source: &Path) -> Result<PathBuf> {
        let contents = fs::read(source)?;
        let mut intermediate = NamedTempFile::new()?;
        intermediate.write_all(&contents)?;
        let (_, path) = intermediate
            .keep()
            .map_err(|e| IngestError::Conversion(e.to_string()))?;
        Ok(path)
    }
}

/// Removes the converter output when the import finishes, whatever the outcome.
struct IntermediateFile(PathBuf);

impl IntermediateFile {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for IntermediateFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "removed intermediate file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), error = %e, "unable to remove intermediate file"),
        }
    }
}

/// One report table.
#[derive(Debug, Default)]
struct WasspRecord {
    machine: String,
    test_id: String,
    observed: Option<NaiveDateTime>,
    title: String,
    description: String,
    status: Status,
    raw_risk: String,
    recommendation: String,
}

/// Import one WASSP report inside a single transaction.
pub(crate) fn import(db: &mut Database, file: &ScannedFile, converter: &dyn HtmlToXml) -> Result<()> {
    let intermediate = IntermediateFile(converter.convert(&file.file_path).inspect_err(|err| {
        error!(file = %file.file_name, error = %err, "unable to convert WASSP report");
    })?);
    let mut cursor = XmlCursor::open(intermediate.path())?;
    let session = db.begin_import(file)?;
    let source_id = session.insert_or_get_source(&VulnerabilitySource::new(WASSP_SOURCE_NAME))?;
    let imported_at = Local::now().naive_local();

    let mut tables = 0usize;
    loop {
        match cursor.next_node()? {
            XmlNode::Start(e) if e.name == "table" => {
                let record = read_table(&mut cursor)?;
                if record.test_id.is_empty() || record.machine.is_empty() {
                    debug!(file = %file.file_name, "skipping table without machine or test");
                    continue;
                }
                persist(&session, file, source_id, imported_at, &record).inspect_err(|err| {
                    error!(test_id = %record.test_id, host = %record.machine, error = %err, "unable to import WASSP test");
                })?;
                tables += 1;
            }
            XmlNode::Eof => break,
            _ => {}
        }
    }

    session.commit()?;
    debug!(file = %file.file_name, tables, "WASSP report imported");
    Ok(())
}

fn read_table<R: BufRead>(cursor: &mut XmlCursor<R>) -> Result<WasspRecord> {
    let mut record = WasspRecord::default();
    let mut depth = 0usize;
    loop {
        let label = match cursor.next_tag()? {
            XmlNode::Start(e) if e.name == "table" => {
                depth += 1;
                continue;
            }
            XmlNode::End(name) if name == "table" => {
                if depth == 0 {
                    return Ok(record);
                }
                depth -= 1;
                continue;
            }
            XmlNode::Start(e) | XmlNode::Empty(e) => e.name,
            XmlNode::Eof => return Err(IngestError::Malformed("document ended inside table".into())),
            _ => continue,
        };

        match label.as_str() {
            "MachineInfo" => record.machine = cursor.read_next_value(&label)?,
            "TestInfo" => record.test_id = cursor.read_next_value(&label)?,
            "DateInfo" => {
                let value = cursor.read_next_value(&label)?;
                let observed = normalize::scan_date(&value).inspect_err(|err| {
                    error!(value = %value, error = %err, "unable to parse WASSP DateInfo");
                })?;
                record.observed = Some(observed);
            }
            "ValueInfo" => record.title = cursor.read_next_value(&label)?,
            "DescriptionInfo" => record.description = cursor.read_next_value(&label)?,
            "TestRes" => record.status = normalize::to_status(&cursor.read_next_value(&label)?),
            "VulnInfo" => record.raw_risk = cursor.read_next_value(&label)?,
            "RecInfo" => record.recommendation = cursor.read_next_value(&label)?,
            _ => {}
        }
    }
}

fn persist(
    session: &ImportSession<'_>,
    file: &ScannedFile,
    source_id: i64,
    imported_at: NaiveDateTime,
    record: &WasspRecord,
) -> Result<()> {
    let host_id = session.insert_or_update_host(&Host::new(&record.machine))?;
    session.map_host_to_group(host_id, &file.group_name)?;

    let mut vulnerability = Vulnerability::new(&record.test_id)
        .with_title(&record.title)
        .with_raw_risk(normalize::to_raw_risk(&record.raw_risk));
    vulnerability.description = record.description.clone();
    vulnerability.fix_text = record.recommendation.clone();
    let vulnerability_id = session.insert_vulnerability(&vulnerability)?;
    session.map_vulnerability_to_source(vulnerability_id, source_id)?;

    let finding = UniqueFinding::new(
        format!("{}_{}_WASSP", record.machine, record.test_id),
        FindingType::Wassp,
        host_id,
        vulnerability_id,
        source_id,
        record.observed.unwrap_or(imported_at),
    )
    .with_status(record.status)
    .with_source_file_name(&file.file_name);
    session.insert_or_update_unique_finding(&finding)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use storage::FindingFilter;
    use tempfile::TempDir;

    fn table(machine: &str, test: &str, date: &str, result: &str) -> String {
        format!(
            "<table>\
             <tr><td><MachineInfo>Machine</MachineInfo></td><td> {machine} </td></tr>\
             <tr><td><TestInfo>Test</TestInfo></td><td>{test}</td></tr>\
             <tr><td><DateInfo>Date</DateInfo></td><td>{date}</td></tr>\
             <tr><td><ValueInfo>Value</ValueInfo></td><td>Guest account enabled</td></tr>\
             <tr><td><DescriptionInfo>Description</DescriptionInfo></td><td>The guest account is enabled.</td></tr>\
             <tr><td><TestRes>Result</TestRes></td><td>{result}</td></tr>\
             <tr><td><VulnInfo>Vulnerability</VulnInfo></td><td>Medium</td></tr>\
             <tr><td><RecInfo>Recommendation</RecInfo></td><td>Disable the guest account.</td></tr>\
             </table>"
        )
    }

    fn report(tables: &[String]) -> String {
        format!("<html><body>{}</body></html>", tables.concat())
    }

    /// Records every intermediate file it hands out.
    #[derive(Default)]
    struct RecordingConverter {
        produced: RefCell<Vec<PathBuf>>,
    }

    impl HtmlToXml for RecordingConverter {
        fn convert(&self, source: &Path) -> Result<PathBuf> {
            let path = PassthroughConverter.convert(source)?;
            self.produced.borrow_mut().push(path.clone());
            Ok(path)
        }
    }

    fn write(dir: &TempDir, contents: &str) -> ScannedFile {
        let path = dir.path().join("wassp.html");
        fs::write(&path, contents).unwrap();
        ScannedFile::new(path, Some("Domain Controllers"))
    }

    #[test]
    fn test_import_report() {
        let tmp = TempDir::new().unwrap();
        let file = write(
            &tmp,
            &report(&[
                table("DC01", "WN-001", "Thu Mar 14\n09:30:00 2019", "Fail"),
                table("DC01", "WN-002", "Thu Mar 14 09:30:00 2019", "Pass"),
            ]),
        );
        let mut db = Database::open_in_memory().unwrap();
        let converter = RecordingConverter::default();

        import(&mut db, &file, &converter).unwrap();

        let open = db.unique_finding("DC01_WN-001_WASSP", FindingType::Wassp).unwrap().unwrap();
        assert_eq!(open.status, Status::Ongoing);
        assert_eq!(open.first_discovered.to_string(), "2019-03-14 00:00:00");
        let passed = db.unique_finding("DC01_WN-002_WASSP", FindingType::Wassp).unwrap().unwrap();
        assert_eq!(passed.status, Status::NotAFinding);

        let summaries = db.findings(&FindingFilter::default()).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].title, "Guest account enabled");
        assert_eq!(summaries[0].raw_risk, models::RawRisk::II);
        assert_eq!(summaries[0].source_name, WASSP_SOURCE_NAME);

        let hosts = db.hosts().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].discovered_host_name, "DC01");

        for path in converter.produced.borrow().iter() {
            assert!(!path.exists());
        }
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let file = write(&tmp, &report(&[table("DC01", "WN-001", "Thu Mar 14 09:30:00 2019", "Fail")]));
        let mut db = Database::open_in_memory().unwrap();

        import(&mut db, &file, &PassthroughConverter).unwrap();
        import(&mut db, &file, &PassthroughConverter).unwrap();

        let findings = db.findings(&FindingFilter::default()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].first_discovered.to_string(), "2019-03-14 00:00:00");
        assert_eq!(db.sources().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_date_aborts_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let file = write(
            &tmp,
            &report(&[
                table("DC01", "WN-001", "Thu Mar 14 09:30:00 2019", "Fail"),
                table("DC01", "WN-002", "the fourteenth of March", "Fail"),
            ]),
        );
        let mut db = Database::open_in_memory().unwrap();
        let converter = RecordingConverter::default();

        let err = import(&mut db, &file, &converter).unwrap_err();

        assert!(matches!(err, IngestError::Date { .. }));
        assert!(db.findings(&FindingFilter::default()).unwrap().is_empty());
        let produced = converter.produced.borrow();
        assert_eq!(produced.len(), 1);
        assert!(!produced[0].exists());
    }
}
