use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::NaiveDateTime;
use models::{
    compare_revisions, FindingScope, FindingType, Host, PortService, Software, Status,
    UniqueFinding, VersionComparison, Vulnerability, VulnerabilityReference, VulnerabilitySource,
};
use rusqlite::{params, OptionalExtension, Transaction};
use tracing::debug;

use crate::error::{Result, StorageError};

/// Write handle for one imported file.
///
/// Every operation runs inside a single transaction. Dropping the session
/// without calling [`ImportSession::commit`] rolls the whole file back.
pub struct ImportSession<'conn> {
    tx: Transaction<'conn>,
    scanned_file_id: i64,
    /// Group of the imported file; part of every host identity written here.
    group_name: String,
}

impl<'conn> ImportSession<'conn> {
    pub(crate) fn new(tx: Transaction<'conn>, scanned_file_id: i64, group_name: &str) -> Self {
        Self {
            tx,
            scanned_file_id,
            group_name: group_name.to_string(),
        }
    }

    /// Row id of the `scanned_files` record created for this import.
    pub fn scanned_file_id(&self) -> i64 {
        self.scanned_file_id
    }

    pub fn commit(self) -> Result<()> {
        let scanned_file_id = self.scanned_file_id;
        self.tx.commit()?;
        debug!(scanned_file_id, "import committed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    /// Return the id of the source with the same name, version and release,
    /// inserting it first when missing.
    pub fn insert_or_get_source(&self, source: &VulnerabilitySource) -> Result<i64> {
        let existing: Option<i64> = self
            .tx
            .query_row(
                "SELECT id FROM vulnerability_sources
                 WHERE name = ?1 AND version = ?2 AND release = ?3",
                params![source.name, source.version, source.release],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        self.tx.execute(
            "INSERT INTO vulnerability_sources
             (name, secondary_identifier, version, release, published_date, description, file_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                source.name,
                source.secondary_identifier,
                source.version,
                source.release,
                source.published_date,
                source.description,
                source.file_name,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    // ------------------------------------------------------------------
    // Hosts and host mappings
    // ------------------------------------------------------------------

    /// Insert the host, or refresh the stored attributes of the host with the
    /// same discovered name and scan IP in the import's group. Blank
    /// attributes never overwrite stored ones.
    pub fn insert_or_update_host(&self, host: &Host) -> Result<i64> {
        let existing: Option<i64> = self
            .tx
            .query_row(
                "SELECT id FROM hosts
                 WHERE discovered_host_name = ?1 AND scan_ip = ?2 AND group_name = ?3",
                params![host.discovered_host_name, host.scan_ip, self.group_name],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            self.tx.execute(
                "UPDATE hosts SET
                    displayed_host_name = COALESCE(NULLIF(?1, ''), displayed_host_name),
                    fqdn                = COALESCE(NULLIF(?2, ''), fqdn),
                    netbios             = COALESCE(NULLIF(?3, ''), netbios),
                    operating_system    = COALESCE(NULLIF(?4, ''), operating_system),
                    role                = COALESCE(NULLIF(?5, ''), role),
                    is_virtual_server   = ?6
                 WHERE id = ?7",
                params![
                    host.displayed_host_name,
                    host.fqdn,
                    host.netbios,
                    host.operating_system,
                    host.role,
                    host.is_virtual_server,
                    id,
                ],
            )?;
            return Ok(id);
        }

        self.tx.execute(
            "INSERT INTO hosts
             (discovered_host_name, displayed_host_name, fqdn, netbios, operating_system,
              scan_ip, group_name, role, is_virtual_server)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                host.discovered_host_name,
                host.displayed_host_name,
                host.fqdn,
                host.netbios,
                host.operating_system,
                host.scan_ip,
                self.group_name,
                host.role,
                host.is_virtual_server,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn map_host_to_group(&self, host_id: i64, group_name: &str) -> Result<()> {
        self.tx.execute(
            "INSERT OR IGNORE INTO groups (name) VALUES (?1)",
            params![group_name],
        )?;
        let group_id: i64 = self.tx.query_row(
            "SELECT id FROM groups WHERE name = ?1",
            params![group_name],
            |row| row.get(0),
        )?;
        self.tx.execute(
            "INSERT OR IGNORE INTO group_hosts (group_id, host_id) VALUES (?1, ?2)",
            params![group_id, host_id],
        )?;
        Ok(())
    }

    /// Record the software and map it to the host. Nameless entries are skipped.
    pub fn insert_or_map_software(&self, host_id: i64, software: &Software) -> Result<()> {
        let name = software.name.trim();
        if name.is_empty() {
            return Ok(());
        }
        let version = software.version.trim();

        self.tx.execute(
            "INSERT OR IGNORE INTO software (name, version, is_os_or_firmware) VALUES (?1, ?2, ?3)",
            params![name, version, software.is_os_or_firmware],
        )?;
        let software_id: i64 = self.tx.query_row(
            "SELECT id FROM software WHERE name = ?1 AND version = ?2",
            params![name, version],
            |row| row.get(0),
        )?;
        self.tx.execute(
            "INSERT INTO host_software (host_id, software_id, install_date) VALUES (?1, ?2, ?3)
             ON CONFLICT (host_id, software_id) DO UPDATE SET install_date = excluded.install_date",
            params![host_id, software_id, software.install_date],
        )?;
        Ok(())
    }

    pub fn insert_or_map_ip_address(&self, host_id: i64, address: &str) -> Result<()> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(());
        }
        let ip_id = self.intern_address("ip_addresses", address)?;
        self.tx.execute(
            "INSERT OR IGNORE INTO host_ip_addresses (host_id, ip_address_id) VALUES (?1, ?2)",
            params![host_id, ip_id],
        )?;
        Ok(())
    }

    pub fn insert_or_map_mac_address(&self, host_id: i64, address: &str) -> Result<()> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(());
        }
        let mac_id = self.intern_address("mac_addresses", &address.to_uppercase())?;
        self.tx.execute(
            "INSERT OR IGNORE INTO host_mac_addresses (host_id, mac_address_id) VALUES (?1, ?2)",
            params![host_id, mac_id],
        )?;
        Ok(())
    }

    /// Record the port/protocol/service triple and map it to the host.
    /// Returns the triple's row id.
    pub fn insert_or_map_port(&self, host_id: i64, port: &PortService) -> Result<i64> {
        self.tx.execute(
            "INSERT OR IGNORE INTO ports_protocols_services (port, protocol, service)
             VALUES (?1, ?2, ?3)",
            params![port.port, port.protocol, port.service],
        )?;
        let port_id: i64 = self.tx.query_row(
            "SELECT id FROM ports_protocols_services
             WHERE port = ?1 AND protocol = ?2 AND service = ?3",
            params![port.port, port.protocol, port.service],
            |row| row.get(0),
        )?;
        self.tx.execute(
            "INSERT OR IGNORE INTO host_ports (host_id, port_id) VALUES (?1, ?2)",
            params![host_id, port_id],
        )?;
        Ok(port_id)
    }

    /// Record whether the host's ACAS scan authenticated. The scan counts as
    /// credentialed only when neither failure plugin fired.
    pub fn set_credentialed_scan_status(
        &self,
        host_id: i64,
        authentication_failed: bool,
        not_admin: bool,
    ) -> Result<()> {
        let credentialed = !(authentication_failed || not_admin);
        self.tx.execute(
            "UPDATE hosts SET credentialed_scan = ?1 WHERE id = ?2",
            params![credentialed, host_id],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Vulnerabilities
    // ------------------------------------------------------------------

    /// Compare the ingested revision with the newest revision of the same
    /// vulnerability already recorded for the host.
    pub fn compare_vulnerability_versions(
        &self,
        scope: &FindingScope<'_>,
        version: &str,
        release: &str,
    ) -> Result<VersionComparison> {
        let stored = self.revisions_in_scope(scope)?;
        let newest = stored
            .iter()
            .map(|(_, _, v, r)| (v.as_str(), r.as_str()))
            .max_by(|a, b| compare_revisions(*a, *b));
        Ok(VersionComparison::classify((version, release), newest))
    }

    /// Return the id of the vulnerability with the same identifier, version and
    /// release, inserting it first when missing.
    pub fn insert_vulnerability(&self, vulnerability: &Vulnerability) -> Result<i64> {
        let existing: Option<i64> = self
            .tx
            .query_row(
                "SELECT id FROM vulnerabilities
                 WHERE unique_identifier = ?1 AND version = ?2 AND release = ?3",
                params![
                    vulnerability.unique_identifier,
                    vulnerability.version,
                    vulnerability.release,
                ],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let v = vulnerability;
        self.tx.execute(
            "INSERT INTO vulnerabilities (
                unique_identifier, group_identifier, group_title, secondary_identifier, title,
                description, family, raw_risk, secondary_raw_risk, risk_statement,
                fix_text, check_content, false_positives, false_negatives, documentable,
                mitigations, potential_impacts, third_party_tools, mitigation_control,
                security_override_guidance, cvss_base_score, cvss_temporal_score,
                cvss_base_vector, cvss_temporal_vector, version, release,
                published_date, modified_date, fix_published_date
             ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20,
                ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29
             )",
            params![
                v.unique_identifier,
                v.group_identifier,
                v.group_title,
                v.secondary_identifier,
                v.title,
                v.description,
                v.family,
                v.raw_risk.as_str(),
                v.secondary_raw_risk,
                v.risk_statement,
                v.fix_text,
                v.check_content,
                v.false_positives,
                v.false_negatives,
                v.documentable,
                v.mitigations,
                v.potential_impacts,
                v.third_party_tools,
                v.mitigation_control,
                v.security_override_guidance,
                v.cvss.base_score,
                v.cvss.temporal_score,
                v.cvss.base_vector,
                v.cvss.temporal_vector,
                v.version,
                v.release,
                v.published_date,
                v.modified_date,
                v.fix_published_date,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn map_vulnerability_to_source(&self, vulnerability_id: i64, source_id: i64) -> Result<()> {
        self.tx.execute(
            "INSERT OR IGNORE INTO vulnerability_source_map (vulnerability_id, source_id)
             VALUES (?1, ?2)",
            params![vulnerability_id, source_id],
        )?;
        Ok(())
    }

    /// Replace the vulnerability's reference mappings with `references`.
    pub fn insert_or_map_vulnerability_references(
        &self,
        vulnerability_id: i64,
        references: &[VulnerabilityReference],
    ) -> Result<()> {
        self.tx.execute(
            "DELETE FROM vulnerability_reference_map WHERE vulnerability_id = ?1",
            params![vulnerability_id],
        )?;
        for reference in references {
            self.tx.execute(
                "INSERT OR IGNORE INTO vulnerability_references (reference, reference_type)
                 VALUES (?1, ?2)",
                params![reference.reference, reference.reference_type],
            )?;
            let reference_id: i64 = self.tx.query_row(
                "SELECT id FROM vulnerability_references
                 WHERE reference = ?1 AND reference_type = ?2",
                params![reference.reference, reference.reference_type],
                |row| row.get(0),
            )?;
            self.tx.execute(
                "INSERT OR IGNORE INTO vulnerability_reference_map (vulnerability_id, reference_id)
                 VALUES (?1, ?2)",
                params![vulnerability_id, reference_id],
            )?;
        }
        Ok(())
    }

    /// Map a `CCI-000366` style reference (prefix optional) to the vulnerability.
    pub fn map_vulnerability_to_cci(&self, vulnerability_id: i64, cci: &str) -> Result<()> {
        let trimmed = cci.trim();
        let number: i64 = trimmed
            .strip_prefix("CCI-")
            .unwrap_or(trimmed)
            .parse()
            .map_err(|_| StorageError::InvalidValue(format!("CCI reference '{cci}'")))?;

        self.tx.execute("INSERT OR IGNORE INTO ccis (cci) VALUES (?1)", params![number])?;
        self.tx.execute(
            "INSERT OR IGNORE INTO vulnerability_cci_map (vulnerability_id, cci) VALUES (?1, ?2)",
            params![vulnerability_id, number],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Unique finding lifecycle
    // ------------------------------------------------------------------

    /// Ids of the host's findings of `finding_type` that are not yet completed
    /// and were last observed before `cutoff`.
    pub fn select_outdated_unique_findings(
        &self,
        host_id: i64,
        finding_type: FindingType,
        cutoff: NaiveDateTime,
    ) -> Result<Vec<i64>> {
        let mut stmt = self.tx.prepare(
            "SELECT id FROM unique_findings
             WHERE host_id = ?1 AND finding_type = ?2 AND last_observed < ?3 AND status != ?4",
        )?;
        let rows = stmt.query_map(
            params![host_id, finding_type.as_str(), cutoff, Status::Completed.as_str()],
            |row| row.get(0),
        )?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Ids of findings in `scope` whose vulnerability revision is older than
    /// `(version, release)`. With `strict`, only findings carrying the scope's
    /// instance identifier qualify.
    pub fn select_outdated_vulnerabilities(
        &self,
        scope: &FindingScope<'_>,
        version: &str,
        release: &str,
        strict: bool,
    ) -> Result<Vec<i64>> {
        let ids = self
            .revisions_in_scope(scope)?
            .into_iter()
            .filter(|(_, instance, _, _)| !strict || instance.as_str() == scope.instance_identifier)
            .filter(|(_, _, v, r)| {
                compare_revisions((v.as_str(), r.as_str()), (version, release)) == Ordering::Less
            })
            .map(|(id, _, _, _)| id)
            .collect();
        Ok(ids)
    }

    pub fn update_unique_finding_status_by_id(&self, finding_id: i64, status: Status) -> Result<()> {
        self.tx.execute(
            "UPDATE unique_findings SET status = ?1 WHERE id = ?2",
            params![status.as_str(), finding_id],
        )?;
        Ok(())
    }

    /// Widen the observation window of every finding in `scope` to include
    /// `observed`. Returns the number of findings touched.
    pub fn update_vulnerability_dates(
        &self,
        scope: &FindingScope<'_>,
        observed: NaiveDateTime,
    ) -> Result<usize> {
        let updated = self.tx.execute(
            "UPDATE unique_findings SET
                first_discovered = MIN(first_discovered, ?1),
                last_observed    = MAX(last_observed, ?1),
                scanned_file_id  = ?2
             WHERE host_id = ?3 AND finding_type = ?4
               AND vulnerability_id IN
                   (SELECT id FROM vulnerabilities WHERE unique_identifier = ?5)",
            params![
                observed,
                self.scanned_file_id,
                scope.host_id,
                scope.finding_type.as_str(),
                scope.vulnerability_identifier,
            ],
        )?;
        Ok(updated)
    }

    pub fn update_delta_analysis_flags(
        &self,
        scope: &FindingScope<'_>,
        required: bool,
    ) -> Result<usize> {
        let updated = self.tx.execute(
            "UPDATE unique_findings SET delta_analysis_required = ?1
             WHERE host_id = ?2 AND finding_type = ?3
               AND vulnerability_id IN
                   (SELECT id FROM vulnerabilities WHERE unique_identifier = ?4)",
            params![
                required,
                scope.host_id,
                scope.finding_type.as_str(),
                scope.vulnerability_identifier,
            ],
        )?;
        Ok(updated)
    }

    /// Insert the finding, or update the stored finding with the same instance
    /// identifier and finding type. The stored observation window only ever
    /// widens. When the host already has a later observation of this finding
    /// type, the stored status stands. Returns the row id.
    pub fn insert_or_update_unique_finding(&self, finding: &UniqueFinding) -> Result<i64> {
        let existing: Option<(i64, String, NaiveDateTime, NaiveDateTime)> = self
            .tx
            .query_row(
                "SELECT id, status, first_discovered, last_observed FROM unique_findings
                 WHERE instance_identifier = ?1 AND finding_type = ?2",
                params![finding.instance_identifier, finding.finding_type.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let f = finding;
        if let Some((id, stored_status, first_discovered, last_observed)) = existing {
            let latest: Option<NaiveDateTime> = self.tx.query_row(
                "SELECT MAX(last_observed) FROM unique_findings
                 WHERE host_id = ?1 AND finding_type = ?2",
                params![f.host_id, f.finding_type.as_str()],
                |row| row.get(0),
            )?;
            let status = if latest.is_some_and(|latest| f.last_observed < latest) {
                debug!(instance = %f.instance_identifier, "older observation keeps stored status");
                stored_status.as_str()
            } else {
                f.status.as_str()
            };
            self.tx.execute(
                "UPDATE unique_findings SET
                    host_id = ?1, vulnerability_id = ?2, source_id = ?3, port_id = ?4,
                    status = ?5, first_discovered = ?6, last_observed = ?7,
                    delta_analysis_required = ?8, comments = ?9, finding_details = ?10,
                    tool_generated_output = ?11, severity_override = ?12,
                    severity_override_justification = ?13, classification = ?14,
                    technology_area = ?15, web_db_site = ?16, web_db_instance = ?17,
                    scanned_file_id = ?18, source_file_name = ?19
                 WHERE id = ?20",
                params![
                    f.host_id,
                    f.vulnerability_id,
                    f.source_id,
                    f.port_id,
                    status,
                    first_discovered.min(f.first_discovered),
                    last_observed.max(f.last_observed),
                    f.delta_analysis_required,
                    f.comments,
                    f.finding_details,
                    f.tool_generated_output,
                    f.severity_override,
                    f.severity_override_justification,
                    f.classification,
                    f.technology_area,
                    f.web_db_site,
                    f.web_db_instance,
                    self.scanned_file_id,
                    f.source_file_name,
                    id,
                ],
            )?;
            return Ok(id);
        }

        self.tx.execute(
            "INSERT INTO unique_findings (
                instance_identifier, finding_type, host_id, vulnerability_id, source_id,
                port_id, status, first_discovered, last_observed, delta_analysis_required,
                comments, finding_details, tool_generated_output, severity_override,
                severity_override_justification, classification, technology_area,
                web_db_site, web_db_instance, scanned_file_id, source_file_name
             ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21
             )",
            params![
                f.instance_identifier,
                f.finding_type.as_str(),
                f.host_id,
                f.vulnerability_id,
                f.source_id,
                f.port_id,
                f.status.as_str(),
                f.first_discovered,
                f.last_observed,
                f.delta_analysis_required,
                f.comments,
                f.finding_details,
                f.tool_generated_output,
                f.severity_override,
                f.severity_override_justification,
                f.classification,
                f.technology_area,
                f.web_db_site,
                f.web_db_instance,
                self.scanned_file_id,
                f.source_file_name,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Delete the host's findings from any release of the source named
    /// `source_name` whose vulnerability identifier is not in `seen`.
    /// Returns the number of findings deleted.
    pub fn delete_removed_vulnerabilities(
        &self,
        host_id: i64,
        source_name: &str,
        finding_type: FindingType,
        seen: &HashSet<String>,
    ) -> Result<usize> {
        let stale: Vec<i64> = {
            let mut stmt = self.tx.prepare(
                "SELECT f.id, v.unique_identifier
                 FROM unique_findings f
                 JOIN vulnerabilities v ON v.id = f.vulnerability_id
                 JOIN vulnerability_sources s ON s.id = f.source_id
                 WHERE f.host_id = ?1 AND s.name = ?2 AND f.finding_type = ?3",
            )?;
            let rows = stmt.query_map(
                params![host_id, source_name, finding_type.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )?;
            let mut stale = Vec::new();
            for row in rows {
                let (id, uvi) = row?;
                if !seen.contains(&uvi) {
                    stale.push(id);
                }
            }
            stale
        };

        for id in &stale {
            self.tx.execute("DELETE FROM unique_findings WHERE id = ?1", params![id])?;
        }
        if !stale.is_empty() {
            debug!(host_id, source = source_name, removed = stale.len(), "removed findings no longer reported");
        }
        Ok(stale.len())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// `(finding id, instance identifier, version, release)` for every finding in scope.
    fn revisions_in_scope(
        &self,
        scope: &FindingScope<'_>,
    ) -> Result<Vec<(i64, String, String, String)>> {
        let mut stmt = self.tx.prepare(
            "SELECT f.id, f.instance_identifier, v.version, v.release
             FROM unique_findings f
             JOIN vulnerabilities v ON v.id = f.vulnerability_id
             WHERE f.host_id = ?1 AND f.finding_type = ?2 AND v.unique_identifier = ?3",
        )?;
        let rows = stmt.query_map(
            params![
                scope.host_id,
                scope.finding_type.as_str(),
                scope.vulnerability_identifier,
            ],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let mut revisions = Vec::new();
        for row in rows {
            revisions.push(row?);
        }
        Ok(revisions)
    }

    fn intern_address(&self, table: &'static str, address: &str) -> Result<i64> {
        self.tx.execute(
            &format!("INSERT OR IGNORE INTO {table} (address) VALUES (?1)"),
            params![address],
        )?;
        let id = self.tx.query_row(
            &format!("SELECT id FROM {table} WHERE address = ?1"),
            params![address],
            |row| row.get(0),
        )?;
        Ok(id)
    }
}

// ------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use models::ScannedFile;

    use super::*;
    use crate::Database;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn ckl_scope<'a>(host_id: i64, rule: &'a str, instance: &'a str) -> FindingScope<'a> {
        FindingScope {
            host_id,
            finding_type: FindingType::Ckl,
            vulnerability_identifier: rule,
            instance_identifier: instance,
        }
    }

    /// Insert a CKL finding for `rule` at `version` and return its row id.
    fn store_rule(
        session: &ImportSession<'_>,
        host_id: i64,
        source_id: i64,
        rule: &str,
        version: &str,
        observed: NaiveDateTime,
    ) -> i64 {
        let vuln_id = session
            .insert_vulnerability(&Vulnerability::new(rule).with_revision(version, ""))
            .unwrap();
        session.map_vulnerability_to_source(vuln_id, source_id).unwrap();
        let finding = UniqueFinding::new(
            format!("host1_{rule}r{version}_CKL"),
            FindingType::Ckl,
            host_id,
            vuln_id,
            source_id,
            observed,
        );
        session.insert_or_update_unique_finding(&finding).unwrap()
    }

    #[test]
    fn test_source_and_host_are_idempotent() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db.begin_import(&ScannedFile::new("a.ckl", None)).unwrap();

        let source = VulnerabilitySource::new("Windows 10 STIG").with_version("2").with_release("5");
        let a = session.insert_or_get_source(&source).unwrap();
        let b = session.insert_or_get_source(&source).unwrap();
        assert_eq!(a, b);

        let h1 = session
            .insert_or_update_host(&Host::new("host1").with_scan_ip("10.1.1.1"))
            .unwrap();
        let h2 = session
            .insert_or_update_host(&Host::new("host1").with_scan_ip("10.1.1.1").with_fqdn("host1.lab"))
            .unwrap();
        let h3 = session
            .insert_or_update_host(&Host::new("host1").with_scan_ip("10.1.1.2"))
            .unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        session.commit().unwrap();

        let hosts = db.hosts().unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].fqdn, "host1.lab");
    }

    #[test]
    fn test_host_identity_includes_group() {
        let mut db = Database::open_in_memory().unwrap();
        let host = Host::new("web01").with_scan_ip("10.0.0.5");
        let mut upsert = |group: &str| {
            let file = ScannedFile::new("a.nessus", Some(group));
            let session = db.begin_import(&file).unwrap();
            let id = session.insert_or_update_host(&host).unwrap();
            session.map_host_to_group(id, &file.group_name).unwrap();
            session.commit().unwrap();
            id
        };

        let in_a = upsert("GroupA");
        let in_b = upsert("GroupB");
        let again = upsert("GroupA");
        assert_ne!(in_a, in_b);
        assert_eq!(in_a, again);

        assert_eq!(db.hosts().unwrap().len(), 2);
        assert_eq!(db.groups_for_host(in_a).unwrap(), vec!["GroupA"]);
        assert_eq!(db.groups_for_host(in_b).unwrap(), vec!["GroupB"]);
    }

    #[test]
    fn test_host_mappings() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db.begin_import(&ScannedFile::new("a.nessus", Some("Lab"))).unwrap();
        let host_id = session.insert_or_update_host(&Host::new("web01")).unwrap();
        session.map_host_to_group(host_id, "Lab").unwrap();
        session.map_host_to_group(host_id, "Lab").unwrap();
        session.insert_or_map_ip_address(host_id, "10.0.0.5").unwrap();
        session.insert_or_map_ip_address(host_id, " ").unwrap();
        session.insert_or_map_mac_address(host_id, "00:0c:29:aa:bb:cc").unwrap();
        session
            .insert_or_map_software(host_id, &Software::operating_system("Microsoft Windows Server 2019"))
            .unwrap();
        session
            .insert_or_map_software(host_id, &Software::new("7-Zip", "19.00").with_install_date("2023/01/02"))
            .unwrap();
        session.insert_or_map_software(host_id, &Software::new("", "1.0")).unwrap();
        session.commit().unwrap();

        assert_eq!(db.groups_for_host(host_id).unwrap(), vec!["Lab"]);
        assert_eq!(db.ip_addresses_for_host(host_id).unwrap(), vec!["10.0.0.5"]);
        assert_eq!(db.mac_addresses_for_host(host_id).unwrap(), vec!["00:0C:29:AA:BB:CC"]);
        let software = db.software_for_host(host_id).unwrap();
        assert_eq!(software.len(), 2);
        assert_eq!(software[0].name, "7-Zip");
        assert_eq!(software[0].install_date, "2023/01/02");
        assert!(software[1].is_os_or_firmware);
    }

    #[test]
    fn test_compare_vulnerability_versions() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db.begin_import(&ScannedFile::new("a.ckl", None)).unwrap();
        let host_id = session.insert_or_update_host(&Host::new("host1")).unwrap();
        let source_id = session.insert_or_get_source(&VulnerabilitySource::new("STIG")).unwrap();
        let scope = ckl_scope(host_id, "SV-1000", "");

        assert_eq!(
            session.compare_vulnerability_versions(&scope, "3", "").unwrap(),
            VersionComparison::RecordNotFound
        );
        store_rule(&session, host_id, source_id, "SV-1000", "3", at(1));
        assert_eq!(
            session.compare_vulnerability_versions(&scope, "5", "").unwrap(),
            VersionComparison::IngestedVersionIsNewer
        );
        assert_eq!(
            session.compare_vulnerability_versions(&scope, "3", "").unwrap(),
            VersionComparison::IdenticalVersions
        );
        store_rule(&session, host_id, source_id, "SV-1000", "5", at(2));
        assert_eq!(
            session.compare_vulnerability_versions(&scope, "3", "").unwrap(),
            VersionComparison::ExistingVersionIsNewer
        );
    }

    #[test]
    fn test_select_outdated_vulnerabilities_strict_and_loose() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db.begin_import(&ScannedFile::new("a.ckl", None)).unwrap();
        let host_id = session.insert_or_update_host(&Host::new("host1")).unwrap();
        let source_id = session.insert_or_get_source(&VulnerabilitySource::new("STIG")).unwrap();
        let r3 = store_rule(&session, host_id, source_id, "SV-1000", "3", at(1));
        let r5 = store_rule(&session, host_id, source_id, "SV-1000", "5", at(2));

        let loose = ckl_scope(host_id, "SV-1000", "host1_SV-1000r5_CKL");
        assert_eq!(session.select_outdated_vulnerabilities(&loose, "5", "", false).unwrap(), vec![r3]);
        assert!(session.select_outdated_vulnerabilities(&loose, "5", "", true).unwrap().is_empty());

        let strict = ckl_scope(host_id, "SV-1000", "host1_SV-1000r3_CKL");
        assert_eq!(session.select_outdated_vulnerabilities(&strict, "5", "", true).unwrap(), vec![r3]);

        let mut both = session.select_outdated_vulnerabilities(&loose, "7", "", false).unwrap();
        both.sort();
        assert_eq!(both, vec![r3, r5]);
    }

    #[test]
    fn test_select_outdated_unique_findings_skips_completed() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db.begin_import(&ScannedFile::new("a.ckl", None)).unwrap();
        let host_id = session.insert_or_update_host(&Host::new("host1")).unwrap();
        let source_id = session.insert_or_get_source(&VulnerabilitySource::new("STIG")).unwrap();
        let old = store_rule(&session, host_id, source_id, "SV-1", "1", at(1));
        let done = store_rule(&session, host_id, source_id, "SV-2", "1", at(1));
        store_rule(&session, host_id, source_id, "SV-3", "1", at(9));
        session.update_unique_finding_status_by_id(done, Status::Completed).unwrap();

        let ids = session
            .select_outdated_unique_findings(host_id, FindingType::Ckl, at(5))
            .unwrap();
        assert_eq!(ids, vec![old]);
        assert!(session
            .select_outdated_unique_findings(host_id, FindingType::Acas, at(5))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_upsert_widens_observation_window() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db.begin_import(&ScannedFile::new("a.ckl", None)).unwrap();
        let host_id = session.insert_or_update_host(&Host::new("host1")).unwrap();
        let source_id = session.insert_or_get_source(&VulnerabilitySource::new("STIG")).unwrap();
        let first = store_rule(&session, host_id, source_id, "SV-1", "1", at(10));
        let again = store_rule(&session, host_id, source_id, "SV-1", "1", at(3));
        let latest = store_rule(&session, host_id, source_id, "SV-1", "1", at(20));
        assert_eq!(first, again);
        assert_eq!(first, latest);
        session.commit().unwrap();

        let stored = db
            .unique_finding("host1_SV-1r1_CKL", FindingType::Ckl)
            .unwrap()
            .unwrap();
        assert_eq!(stored.first_discovered, at(3));
        assert_eq!(stored.last_observed, at(20));
    }

    #[test]
    fn test_older_observation_keeps_stored_status() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db.begin_import(&ScannedFile::new("a.nessus", None)).unwrap();
        let host_id = session.insert_or_update_host(&Host::new("host1")).unwrap();
        let source_id = session.insert_or_get_source(&VulnerabilitySource::new("Nessus")).unwrap();
        let vuln_id = session.insert_vulnerability(&Vulnerability::new("12345")).unwrap();
        let observed = |day: u32, status: Status| {
            UniqueFinding::new("host1_12345_0_tcp_", FindingType::Acas, host_id, vuln_id, source_id, at(day))
                .with_status(status)
        };

        let id = session
            .insert_or_update_unique_finding(&observed(10, Status::Ongoing))
            .unwrap();
        session.update_unique_finding_status_by_id(id, Status::Completed).unwrap();
        session
            .insert_or_update_unique_finding(&observed(4, Status::Ongoing))
            .unwrap();
        session.commit().unwrap();

        let stored = db
            .unique_finding("host1_12345_0_tcp_", FindingType::Acas)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, Status::Completed);
        assert_eq!(stored.first_discovered, at(4));
        assert_eq!(stored.last_observed, at(10));
    }

    #[test]
    fn test_update_dates_and_delta_flags() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db.begin_import(&ScannedFile::new("a.ckl", None)).unwrap();
        let host_id = session.insert_or_update_host(&Host::new("host1")).unwrap();
        let source_id = session.insert_or_get_source(&VulnerabilitySource::new("STIG")).unwrap();
        store_rule(&session, host_id, source_id, "SV-1", "5", at(10));

        let scope = ckl_scope(host_id, "SV-1", "host1_SV-1r3_CKL");
        assert_eq!(session.update_vulnerability_dates(&scope, at(12)).unwrap(), 1);
        assert_eq!(session.update_delta_analysis_flags(&scope, true).unwrap(), 1);
        session.commit().unwrap();

        let stored = db.unique_finding("host1_SV-1r5_CKL", FindingType::Ckl).unwrap().unwrap();
        assert_eq!(stored.first_discovered, at(10));
        assert_eq!(stored.last_observed, at(12));
        assert!(stored.delta_analysis_required);
    }

    #[test]
    fn test_references_are_rebuilt() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db.begin_import(&ScannedFile::new("a.nessus", None)).unwrap();
        let vuln_id = session.insert_vulnerability(&Vulnerability::new("12345")).unwrap();
        session
            .insert_or_map_vulnerability_references(
                vuln_id,
                &[
                    VulnerabilityReference::new("CVE-2020-0001", "CVE"),
                    VulnerabilityReference::new("2020-A-0001", "IAVA"),
                ],
            )
            .unwrap();
        session
            .insert_or_map_vulnerability_references(
                vuln_id,
                &[VulnerabilityReference::new("CVE-2021-0002", "CVE")],
            )
            .unwrap();
        session.commit().unwrap();

        assert_eq!(
            db.references_for("12345").unwrap(),
            vec![VulnerabilityReference::new("CVE-2021-0002", "CVE")]
        );
    }

    #[test]
    fn test_cci_mapping() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db.begin_import(&ScannedFile::new("a.ckl", None)).unwrap();
        let vuln_id = session.insert_vulnerability(&Vulnerability::new("SV-1")).unwrap();
        session.map_vulnerability_to_cci(vuln_id, "CCI-000366").unwrap();
        session.map_vulnerability_to_cci(vuln_id, "000366").unwrap();
        session.map_vulnerability_to_cci(vuln_id, "CCI-001234").unwrap();
        assert!(matches!(
            session.map_vulnerability_to_cci(vuln_id, "CCI-abc"),
            Err(StorageError::InvalidValue(_))
        ));
        session.commit().unwrap();

        assert_eq!(db.ccis_for("SV-1").unwrap(), vec![366, 1234]);
    }

    #[test]
    fn test_delete_removed_vulnerabilities() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db.begin_import(&ScannedFile::new("a.ckl", None)).unwrap();
        let host_id = session.insert_or_update_host(&Host::new("host1")).unwrap();
        let release_5 = session
            .insert_or_get_source(&VulnerabilitySource::new("STIG").with_version("2").with_release("5"))
            .unwrap();
        let release_6 = session
            .insert_or_get_source(&VulnerabilitySource::new("STIG").with_version("2").with_release("6"))
            .unwrap();
        let other_source = session
            .insert_or_get_source(&VulnerabilitySource::new("Other STIG"))
            .unwrap();
        store_rule(&session, host_id, release_6, "SV-1", "1", at(2));
        store_rule(&session, host_id, release_5, "SV-2", "1", at(1));
        store_rule(&session, host_id, release_6, "SV-3", "1", at(2));
        store_rule(&session, host_id, other_source, "SV-9", "1", at(1));

        let seen: HashSet<String> = ["SV-1".to_string()].into_iter().collect();
        let removed = session
            .delete_removed_vulnerabilities(host_id, "STIG", FindingType::Ckl, &seen)
            .unwrap();
        assert_eq!(removed, 2);
        session.commit().unwrap();

        assert!(db.unique_finding("host1_SV-2r1_CKL", FindingType::Ckl).unwrap().is_none());
        assert!(db.unique_finding("host1_SV-3r1_CKL", FindingType::Ckl).unwrap().is_none());
        assert!(db.unique_finding("host1_SV-1r1_CKL", FindingType::Ckl).unwrap().is_some());
        assert!(db.unique_finding("host1_SV-9r1_CKL", FindingType::Ckl).unwrap().is_some());
    }

    #[test]
    fn test_credentialed_scan_status() {
        let mut db = Database::open_in_memory().unwrap();
        let session = db.begin_import(&ScannedFile::new("a.nessus", None)).unwrap();
        let good = session.insert_or_update_host(&Host::new("good")).unwrap();
        let bad = session.insert_or_update_host(&Host::new("bad")).unwrap();
        session.set_credentialed_scan_status(good, false, false).unwrap();
        session.set_credentialed_scan_status(bad, false, true).unwrap();
        session.commit().unwrap();

        let hosts = db.hosts().unwrap();
        let status = |name: &str| {
            hosts
                .iter()
                .find(|h| h.discovered_host_name == name)
                .and_then(|h| h.credentialed_scan)
        };
        assert_eq!(status("good"), Some(true));
        assert_eq!(status("bad"), Some(false));
    }
}
