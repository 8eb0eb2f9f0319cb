use std::io::Write;
use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};
use models::{
    FindingSummary, FindingType, Host, RawRisk, ScannedFile, Software, Status, UniqueFinding,
    VulnerabilityReference, VulnerabilitySource,
};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::schema;
use crate::session::ImportSession;

/// Thin wrapper around the SQLite connection holding the findings store.
pub struct Database {
    conn: Connection,
}

/// Optional filters for [`Database::findings`].
#[derive(Clone, Debug, Default)]
pub struct FindingFilter {
    pub host: Option<String>,
    pub finding_type: Option<FindingType>,
    pub status: Option<Status>,
}

impl Database {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let conn = Connection::open(&path)?;
        let db = Self { conn };
        db.migrate()?;
        debug!(path = %path.display(), "findings database opened");
        Ok(db)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        schema::initialize(&self.conn)
    }

    // ------------------------------------------------------------------
    // Imports
    // ------------------------------------------------------------------

    /// Start the transaction that will hold every change made while importing
    /// `file`, and record the file itself.
    pub fn begin_import(&mut self, file: &ScannedFile) -> Result<ImportSession<'_>> {
        let tx = self.conn.transaction()?;
        let file_path = file.file_path.to_string_lossy().into_owned();
        tx.execute(
            "INSERT INTO scanned_files (file_name, file_path, group_name, imported_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![file.file_name, file_path, file.group_name, Local::now().naive_local()],
        )?;
        let scanned_file_id = tx.last_insert_rowid();
        debug!(file = %file.file_name, scanned_file_id, "import started");
        Ok(ImportSession::new(tx, scanned_file_id, &file.group_name))
    }

    // ------------------------------------------------------------------
    // Read operations
    // ------------------------------------------------------------------

    /// Load findings joined with host, vulnerability and source, filtered by
    /// host name, finding type and status.
    pub fn findings(&self, filter: &FindingFilter) -> Result<Vec<FindingSummary>> {
        let mut sql = String::from(
            "SELECT f.id, f.instance_identifier, f.finding_type, h.discovered_host_name,
                    v.unique_identifier, v.title, v.raw_risk, f.status,
                    f.first_discovered, f.last_observed, f.delta_analysis_required,
                    s.name, f.source_file_name
             FROM unique_findings f
             JOIN hosts h ON h.id = f.host_id
             JOIN vulnerabilities v ON v.id = f.vulnerability_id
             JOIN vulnerability_sources s ON s.id = f.source_id
             WHERE 1=1",
        );
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(host) = &filter.host {
            sql.push_str(" AND h.discovered_host_name = ?");
            params_vec.push(Box::new(host.clone()));
        }
        if let Some(finding_type) = filter.finding_type {
            sql.push_str(" AND f.finding_type = ?");
            params_vec.push(Box::new(finding_type.as_str()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND f.status = ?");
            params_vec.push(Box::new(status.as_str()));
        }
        sql.push_str(" ORDER BY h.discovered_host_name, f.finding_type, f.instance_identifier");

        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_refs.as_slice(), |row| {
            Ok(FindingRow {
                id: row.get(0)?,
                instance_identifier: row.get(1)?,
                finding_type: row.get(2)?,
                host_name: row.get(3)?,
                vulnerability_identifier: row.get(4)?,
                title: row.get(5)?,
                raw_risk: row.get(6)?,
                status: row.get(7)?,
                first_discovered: row.get(8)?,
                last_observed: row.get(9)?,
                delta_analysis_required: row.get(10)?,
                source_name: row.get(11)?,
                source_file_name: row.get(12)?,
            })
        })?;

        let mut findings = Vec::new();
        for row in rows {
            let r = row?;
            let finding_type: FindingType =
                r.finding_type.parse().map_err(StorageError::InvalidValue)?;
            let raw_risk: RawRisk = r.raw_risk.parse().unwrap_or(RawRisk::Unknown);
            let status: Status = r.status.parse().unwrap_or(Status::Unknown);
            findings.push(FindingSummary {
                id: r.id,
                instance_identifier: r.instance_identifier,
                finding_type,
                host_name: r.host_name,
                vulnerability_identifier: r.vulnerability_identifier,
                title: r.title,
                raw_risk,
                status,
                first_discovered: r.first_discovered,
                last_observed: r.last_observed,
                delta_analysis_required: r.delta_analysis_required,
                source_name: r.source_name,
                source_file_name: r.source_file_name,
            });
        }
        Ok(findings)
    }

    /// Load one finding by its identity, if stored.
    pub fn unique_finding(
        &self,
        instance_identifier: &str,
        finding_type: FindingType,
    ) -> Result<Option<UniqueFinding>> {
        let finding = self
            .conn
            .query_row(
                "SELECT id, host_id, vulnerability_id, source_id, port_id, status,
                        first_discovered, last_observed, delta_analysis_required, comments,
                        finding_details, tool_generated_output, severity_override,
                        severity_override_justification, classification, technology_area,
                        web_db_site, web_db_instance, source_file_name
                 FROM unique_findings WHERE instance_identifier = ?1 AND finding_type = ?2",
                params![instance_identifier, finding_type.as_str()],
                |row| {
                    let status: String = row.get(5)?;
                    Ok(UniqueFinding {
                        id: Some(row.get(0)?),
                        instance_identifier: instance_identifier.to_string(),
                        finding_type,
                        host_id: row.get(1)?,
                        vulnerability_id: row.get(2)?,
                        source_id: row.get(3)?,
                        port_id: row.get(4)?,
                        status: status.parse().unwrap_or(Status::Unknown),
                        first_discovered: row.get(6)?,
                        last_observed: row.get(7)?,
                        delta_analysis_required: row.get(8)?,
                        comments: row.get(9)?,
                        finding_details: row.get(10)?,
                        tool_generated_output: row.get(11)?,
                        severity_override: row.get(12)?,
                        severity_override_justification: row.get(13)?,
                        classification: row.get(14)?,
                        technology_area: row.get(15)?,
                        web_db_site: row.get(16)?,
                        web_db_instance: row.get(17)?,
                        source_file_name: row.get(18)?,
                    })
                },
            )
            .optional()?;
        Ok(finding)
    }

    /// Load all hosts ordered by name.
    pub fn hosts(&self) -> Result<Vec<Host>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, discovered_host_name, displayed_host_name, fqdn, netbios,
                    operating_system, scan_ip, role, is_virtual_server, credentialed_scan
             FROM hosts ORDER BY discovered_host_name, scan_ip, group_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Host {
                id: Some(row.get(0)?),
                discovered_host_name: row.get(1)?,
                displayed_host_name: row.get(2)?,
                fqdn: row.get(3)?,
                netbios: row.get(4)?,
                operating_system: row.get(5)?,
                scan_ip: row.get(6)?,
                role: row.get(7)?,
                is_virtual_server: row.get(8)?,
                credentialed_scan: row.get(9)?,
            })
        })?;

        let mut hosts = Vec::new();
        for row in rows {
            hosts.push(row?);
        }
        Ok(hosts)
    }

    pub fn groups_for_host(&self, host_id: i64) -> Result<Vec<String>> {
        self.strings(
            "SELECT g.name FROM groups g JOIN group_hosts gh ON gh.group_id = g.id
             WHERE gh.host_id = ?1 ORDER BY g.name",
            host_id,
        )
    }

    pub fn ip_addresses_for_host(&self, host_id: i64) -> Result<Vec<String>> {
        self.strings(
            "SELECT a.address FROM ip_addresses a
             JOIN host_ip_addresses m ON m.ip_address_id = a.id
             WHERE m.host_id = ?1 ORDER BY a.address",
            host_id,
        )
    }

    pub fn mac_addresses_for_host(&self, host_id: i64) -> Result<Vec<String>> {
        self.strings(
            "SELECT a.address FROM mac_addresses a
             JOIN host_mac_addresses m ON m.mac_address_id = a.id
             WHERE m.host_id = ?1 ORDER BY a.address",
            host_id,
        )
    }

    pub fn software_for_host(&self, host_id: i64) -> Result<Vec<Software>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.name, s.version, hs.install_date, s.is_os_or_firmware
             FROM software s JOIN host_software hs ON hs.software_id = s.id
             WHERE hs.host_id = ?1 ORDER BY s.name, s.version",
        )?;
        let rows = stmt.query_map(params![host_id], |row| {
            Ok(Software {
                name: row.get(0)?,
                version: row.get(1)?,
                install_date: row.get(2)?,
                is_os_or_firmware: row.get(3)?,
            })
        })?;

        let mut software = Vec::new();
        for row in rows {
            software.push(row?);
        }
        Ok(software)
    }

    /// References mapped to any revision of the vulnerability.
    pub fn references_for(&self, vulnerability_identifier: &str) -> Result<Vec<VulnerabilityReference>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT r.reference, r.reference_type
             FROM vulnerability_references r
             JOIN vulnerability_reference_map m ON m.reference_id = r.id
             JOIN vulnerabilities v ON v.id = m.vulnerability_id
             WHERE v.unique_identifier = ?1 ORDER BY r.reference_type, r.reference",
        )?;
        let rows = stmt.query_map(params![vulnerability_identifier], |row| {
            Ok(VulnerabilityReference::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut references = Vec::new();
        for row in rows {
            references.push(row?);
        }
        Ok(references)
    }

    /// CCI numbers mapped to any revision of the vulnerability.
    pub fn ccis_for(&self, vulnerability_identifier: &str) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT m.cci FROM vulnerability_cci_map m
             JOIN vulnerabilities v ON v.id = m.vulnerability_id
             WHERE v.unique_identifier = ?1 ORDER BY m.cci",
        )?;
        let rows = stmt.query_map(params![vulnerability_identifier], |row| row.get(0))?;
        let mut ccis = Vec::new();
        for row in rows {
            ccis.push(row?);
        }
        Ok(ccis)
    }

    pub fn sources(&self) -> Result<Vec<VulnerabilitySource>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, secondary_identifier, version, release, published_date,
                    description, file_name
             FROM vulnerability_sources ORDER BY name, version, release",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(VulnerabilitySource {
                name: row.get(0)?,
                secondary_identifier: row.get(1)?,
                version: row.get(2)?,
                release: row.get(3)?,
                published_date: row.get(4)?,
                description: row.get(5)?,
                file_name: row.get(6)?,
            })
        })?;

        let mut sources = Vec::new();
        for row in rows {
            sources.push(row?);
        }
        Ok(sources)
    }

    /// Number of stored vulnerability revisions.
    pub fn vulnerability_count(&self) -> Result<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM vulnerabilities", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Count findings grouped by status.
    pub fn status_counts(&self) -> Result<Vec<(Status, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM unique_findings GROUP BY status ORDER BY status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row?;
            counts.push((status.parse().unwrap_or(Status::Unknown), count));
        }
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Write operations
    // ------------------------------------------------------------------

    /// Force the status of one finding, outside of any import.
    pub fn update_status(
        &self,
        instance_identifier: &str,
        finding_type: FindingType,
        status: Status,
    ) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE unique_findings SET status = ?1
             WHERE instance_identifier = ?2 AND finding_type = ?3",
            params![status.as_str(), instance_identifier, finding_type.as_str()],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(format!(
                "{finding_type} finding '{instance_identifier}'"
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Destructive operations
    // ------------------------------------------------------------------

    /// Delete every row from the store. Returns the number of findings deleted.
    pub fn clean(&self) -> Result<u64> {
        let findings: u64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM unique_findings", [], |row| row.get(0))?;
        for table in schema::TABLES {
            self.conn.execute(&format!("DELETE FROM {table}"), [])?;
        }
        Ok(findings)
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    /// Write every finding as CSV (header + rows). Returns the number of rows.
    pub fn export_csv<W: Write>(&self, writer: W) -> Result<u64> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record([
            "instance_identifier",
            "finding_type",
            "host",
            "scan_ip",
            "vulnerability",
            "version",
            "release",
            "title",
            "raw_risk",
            "status",
            "first_discovered",
            "last_observed",
            "delta_analysis_required",
            "source",
            "source_version",
            "source_release",
            "port",
            "protocol",
            "service",
            "source_file_name",
            "comments",
        ])?;

        let mut stmt = self.conn.prepare(
            "SELECT f.instance_identifier, f.finding_type, h.discovered_host_name, h.scan_ip,
                    v.unique_identifier, v.version, v.release, v.title, v.raw_risk, f.status,
                    f.first_discovered, f.last_observed, f.delta_analysis_required,
                    s.name, s.version, s.release,
                    COALESCE(p.port, ''), COALESCE(p.protocol, ''), COALESCE(p.service, ''),
                    f.source_file_name, COALESCE(f.comments, '')
             FROM unique_findings f
             JOIN hosts h ON h.id = f.host_id
             JOIN vulnerabilities v ON v.id = f.vulnerability_id
             JOIN vulnerability_sources s ON s.id = f.source_id
             LEFT JOIN ports_protocols_services p ON p.id = f.port_id
             ORDER BY h.discovered_host_name, f.finding_type, f.instance_identifier",
        )?;
        let mut rows = stmt.query([])?;

        let mut written = 0;
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(21);
            for i in 0..21 {
                let value = match i {
                    10 | 11 => row.get::<_, NaiveDateTime>(i)?.to_string(),
                    12 => row.get::<_, bool>(i)?.to_string(),
                    _ => row.get::<_, String>(i)?,
                };
                record.push(value);
            }
            out.write_record(&record)?;
            written += 1;
        }
        out.flush()?;
        Ok(written)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn strings(&self, sql: &str, id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![id], |row| row.get(0))?;
        let mut values = Vec::new();
        for row in rows {
            values.push(row?);
        }
        Ok(values)
    }
}

/// Internal helper for row mapping.
struct FindingRow {
    id: i64,
    instance_identifier: String,
    finding_type: String,
    host_name: String,
    vulnerability_identifier: String,
    title: String,
    raw_risk: String,
    status: String,
    first_discovered: NaiveDateTime,
    last_observed: NaiveDateTime,
    delta_analysis_required: bool,
    source_name: String,
    source_file_name: String,
}

// ------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use models::{PortService, Vulnerability};
    use tempfile::TempDir;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    /// Store one ACAS-style finding on `web01` and return its instance id.
    fn seed(db: &mut Database, observed: NaiveDateTime) -> String {
        let file = ScannedFile::new("/scans/weekly.nessus", None);
        let session = db.begin_import(&file).unwrap();
        let source_id = session
            .insert_or_get_source(&VulnerabilitySource::new("Tenable Nessus Scanner"))
            .unwrap();
        let host_id = session
            .insert_or_update_host(&Host::new("web01").with_scan_ip("10.0.0.5"))
            .unwrap();
        session.map_host_to_group(host_id, &file.group_name).unwrap();
        let vuln_id = session
            .insert_vulnerability(
                &Vulnerability::new("12345")
                    .with_title("TLS weak ciphers")
                    .with_raw_risk(RawRisk::II)
                    .with_revision("1", "12"),
            )
            .unwrap();
        let port_id = session
            .insert_or_map_port(host_id, &PortService::new("443", "tcp", "https"))
            .unwrap();
        let finding = UniqueFinding::new(
            "web01_12345_443_tcp_https",
            FindingType::Acas,
            host_id,
            vuln_id,
            source_id,
            observed,
        )
        .with_port(Some(port_id))
        .with_source_file_name(&file.file_name);
        session.insert_or_update_unique_finding(&finding).unwrap();
        session.commit().unwrap();
        finding.instance_identifier
    }

    #[test]
    fn test_begin_import_records_scanned_file() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db
            .begin_import(&ScannedFile::new("/scans/a.ckl", Some("DMZ")))
            .unwrap();
        assert!(session.scanned_file_id() > 0);
        session.commit().unwrap();

        let (name, group): (String, String) = db
            .conn
            .query_row("SELECT file_name, group_name FROM scanned_files", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "a.ckl");
        assert_eq!(group, "DMZ");
    }

    #[test]
    fn test_dropped_session_rolls_back() {
        let mut db = Database::open_in_memory().unwrap();
        {
            let session = db.begin_import(&ScannedFile::new("/scans/x.nessus", None)).unwrap();
            session.insert_or_update_host(&Host::new("web01")).unwrap();
        }
        assert!(db.hosts().unwrap().is_empty());
        let files: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM scanned_files", [], |row| row.get(0))
            .unwrap();
        assert_eq!(files, 0);
    }

    #[test]
    fn test_findings_filtered() {
        let mut db = Database::open_in_memory().unwrap();
        seed(&mut db, at(1));

        let all = db.findings(&FindingFilter::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].host_name, "web01");
        assert_eq!(all[0].vulnerability_identifier, "12345");
        assert_eq!(all[0].raw_risk, RawRisk::II);
        assert_eq!(all[0].status, Status::Ongoing);
        assert_eq!(all[0].source_file_name, "weekly.nessus");

        let none = db
            .findings(&FindingFilter {
                finding_type: Some(FindingType::Ckl),
                ..Default::default()
            })
            .unwrap();
        assert!(none.is_empty());

        let by_host = db
            .findings(&FindingFilter {
                host: Some("web01".into()),
                status: Some(Status::Ongoing),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_host.len(), 1);
    }

    #[test]
    fn test_update_status() {
        let mut db = Database::open_in_memory().unwrap();
        let id = seed(&mut db, at(1));

        db.update_status(&id, FindingType::Acas, Status::NotApplicable).unwrap();
        let stored = db.unique_finding(&id, FindingType::Acas).unwrap().unwrap();
        assert_eq!(stored.status, Status::NotApplicable);

        let missing = db.update_status("nope", FindingType::Acas, Status::Completed);
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_status_counts() {
        let mut db = Database::open_in_memory().unwrap();
        seed(&mut db, at(1));
        let counts = db.status_counts().unwrap();
        assert_eq!(counts, vec![(Status::Ongoing, 1)]);
        assert_eq!(db.vulnerability_count().unwrap(), 1);
    }

    #[test]
    fn test_export_csv() {
        let mut db = Database::open_in_memory().unwrap();
        seed(&mut db, at(1));

        let mut buf = Vec::new();
        let rows = db.export_csv(&mut buf).unwrap();
        assert_eq!(rows, 1);

        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("instance_identifier,finding_type,host"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("web01_12345_443_tcp_https,ACAS,web01,10.0.0.5,12345,1,12"));
        assert!(row.contains(",443,tcp,https,weekly.nessus,"));
    }

    #[test]
    fn test_clean() {
        let mut db = Database::open_in_memory().unwrap();
        seed(&mut db, at(1));
        assert_eq!(db.clean().unwrap(), 1);
        assert!(db.findings(&FindingFilter::default()).unwrap().is_empty());
        assert!(db.hosts().unwrap().is_empty());
    }

    #[test]
    fn test_open_on_disk_persists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scanmerge.db");
        {
            let mut db = Database::open(&path).unwrap();
            seed(&mut db, at(1));
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.findings(&FindingFilter::default()).unwrap().len(), 1);
    }
}
