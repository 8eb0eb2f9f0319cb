//! DISA STIG Viewer checklist (`.ckl`) reader.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::Path;

use chrono::{Local, NaiveDateTime};
use models::{
    FindingScope, FindingType, Host, ScannedFile, Status, UniqueFinding, VersionComparison,
    Vulnerability, VulnerabilitySource,
};
use storage::{Database, ImportSession};
use tracing::{debug, error, warn};

use crate::error::{IngestError, Result};
use crate::normalize::{self, IPV4_ADDRESS, IPV6_ADDRESS, MAC_ADDRESS};
use crate::settings::Settings;
use crate::xml::{XmlCursor, XmlNode};

const HOST_NAME_PLACEHOLDER: &str = "HOST NAME";
const IP_PLACEHOLDER: &str = "IP";
const MAC_PLACEHOLDER: &str = "MAC";

/// `FINDING_DETAILS` carrying SCAP benchmark output rather than reviewer notes.
const TOOL_OUTPUT_MARKER: &str = "<cdf:";

// ------------------------------------------------------------------
// VULN attributes
// ------------------------------------------------------------------

/// Canonical `VULN_ATTRIBUTE` names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VulnField {
    VulnNum,
    Severity,
    GroupTitle,
    RuleId,
    RuleVer,
    RuleTitle,
    VulnDiscuss,
    CheckContent,
    FixText,
    FalsePositives,
    FalseNegatives,
    Documentable,
    Mitigations,
    PotentialImpacts,
    ThirdPartyTools,
    MitigationControl,
    SecurityOverrideGuidance,
    CciRef,
    Class,
}

/// Every spelling STIG Viewer has used for each attribute.
const ATTRIBUTE_SPELLINGS: &[(&str, VulnField)] = &[
    ("Vuln_Num", VulnField::VulnNum),
    ("Severity", VulnField::Severity),
    ("Group_Title", VulnField::GroupTitle),
    ("Rule_ID", VulnField::RuleId),
    ("Rule_Ver", VulnField::RuleVer),
    ("Rule_Title", VulnField::RuleTitle),
    ("Vuln_Discuss", VulnField::VulnDiscuss),
    ("Check_Content", VulnField::CheckContent),
    ("CheckContent", VulnField::CheckContent),
    ("Fix_Text", VulnField::FixText),
    ("FixText", VulnField::FixText),
    ("False_Positives", VulnField::FalsePositives),
    ("FalsePositives", VulnField::FalsePositives),
    ("False_Negatives", VulnField::FalseNegatives),
    ("FalseNegatives", VulnField::FalseNegatives),
    ("Documentable", VulnField::Documentable),
    ("Mitigations", VulnField::Mitigations),
    ("Potential_Impact", VulnField::PotentialImpacts),
    ("PotentialImpacts", VulnField::PotentialImpacts),
    ("Third_Party_Tools", VulnField::ThirdPartyTools),
    ("ThirdPartyTools", VulnField::ThirdPartyTools),
    ("Mitigation_Control", VulnField::MitigationControl),
    ("MitigationControl", VulnField::MitigationControl),
    ("Security_Override_Guidance", VulnField::SecurityOverrideGuidance),
    ("SecurityOverrideGuidance", VulnField::SecurityOverrideGuidance),
    ("CCI_REF", VulnField::CciRef),
    ("Class", VulnField::Class),
];

impl VulnField {
    fn from_attribute(name: &str) -> Option<Self> {
        ATTRIBUTE_SPELLINGS
            .iter()
            .find(|(spelling, _)| *spelling == name)
            .map(|(_, field)| *field)
    }
}

// ------------------------------------------------------------------
// Section drafts
// ------------------------------------------------------------------

#[derive(Debug, Default)]
struct AssetInfo {
    role: String,
    host_name: String,
    ip_address: String,
    mac_address: String,
    fqdn: String,
    tech_area: String,
    web_db_site: String,
    web_db_instance: String,
}

/// The persisted host every VULN of the file belongs to.
struct CklHost {
    host_id: i64,
    name: String,
    tech_area: Option<String>,
    web_db_site: Option<String>,
    web_db_instance: Option<String>,
}

/// One `VULN`, drafted fresh for every rule.
#[derive(Debug, Default)]
struct VulnRecord {
    vulnerability: Vulnerability,
    ccis: Vec<String>,
    classification: String,
    status: Status,
    finding_details: String,
    comments: String,
    severity_override: String,
    severity_justification: String,
}

impl VulnRecord {
    fn set(&mut self, field: VulnField, value: String) {
        let v = &mut self.vulnerability;
        match field {
            VulnField::VulnNum => v.group_identifier = value,
            VulnField::Severity => v.raw_risk = normalize::to_raw_risk(&value),
            VulnField::GroupTitle => v.group_title = value,
            VulnField::RuleId => {
                let (rule, revision) = normalize::split_rule_id(&value);
                v.unique_identifier = rule;
                v.version = revision;
                v.release = String::new();
            }
            VulnField::RuleVer => v.secondary_identifier = value,
            VulnField::RuleTitle => v.title = value,
            VulnField::VulnDiscuss => v.description = value,
            VulnField::CheckContent => v.check_content = value,
            VulnField::FixText => v.fix_text = value,
            VulnField::FalsePositives => v.false_positives = value,
            VulnField::FalseNegatives => v.false_negatives = value,
            VulnField::Documentable => v.documentable = value,
            VulnField::Mitigations => v.mitigations = value,
            VulnField::PotentialImpacts => v.potential_impacts = value,
            VulnField::ThirdPartyTools => v.third_party_tools = value,
            VulnField::MitigationControl => v.mitigation_control = value,
            VulnField::SecurityOverrideGuidance => v.security_override_guidance = value,
            VulnField::CciRef => self.ccis.push(value),
            VulnField::Class => self.classification = value,
        }
    }

    fn instance_identifier(&self, host_name: &str) -> String {
        format!(
            "{}_{}r{}_CKL",
            host_name, self.vulnerability.unique_identifier, self.vulnerability.version
        )
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// State carried across the sections of one checklist.
struct CklContext<'a> {
    file: &'a ScannedFile,
    observed: NaiveDateTime,
    host: Option<CklHost>,
    source_id: Option<i64>,
    source_name: String,
    /// Vulnerability identifiers seen per source name in this pass.
    seen: HashMap<String, HashSet<String>>,
}

// ------------------------------------------------------------------
// Import
// ------------------------------------------------------------------

/// Import one checklist inside a single transaction.
pub(crate) fn import(db: &mut Database, file: &ScannedFile) -> Result<()> {
    let mut cursor = XmlCursor::open(&file.file_path)?;
    let session = db.begin_import(file)?;
    let mut ctx = CklContext {
        file,
        observed: Local::now().naive_local(),
        host: None,
        source_id: None,
        source_name: String::new(),
        seen: HashMap::new(),
    };

    loop {
        match cursor.next_node()? {
            XmlNode::Start(e) if e.name == "ASSET" => {
                let asset = read_asset(&mut cursor)?;
                ctx.host = Some(persist_asset(&session, &ctx, asset)?);
            }
            XmlNode::Start(e) if e.name == "STIG_INFO" => {
                let source = read_stig_info(&mut cursor)?;
                ctx.source_id = Some(session.insert_or_get_source(&source)?);
                ctx.seen.entry(source.name.clone()).or_default();
                ctx.source_name = source.name;
            }
            XmlNode::Start(e) if e.name == "VULN" => {
                let record = read_vuln(&mut cursor)?;
                let rule_id = record.vulnerability.unique_identifier.clone();
                import_vuln(&session, &mut ctx, record).inspect_err(|err| {
                    error!(rule_id = %rule_id, file = %file.file_name, error = %err, "unable to import rule");
                })?;
            }
            XmlNode::Eof => break,
            _ => {}
        }
    }

    if let Some(host) = &ctx.host {
        // Any release of the STIG counts; a new release may drop rules.
        for (source_name, seen) in &ctx.seen {
            session.delete_removed_vulnerabilities(host.host_id, source_name, FindingType::Ckl, seen)?;
        }
    }

    session.commit()?;
    debug!(file = %file.file_name, "checklist imported");
    Ok(())
}

fn read_asset<R: BufRead>(cursor: &mut XmlCursor<R>) -> Result<AssetInfo> {
    let mut asset = AssetInfo::default();
    loop {
        let node = cursor.next_node()?;
        let name = match &node {
            XmlNode::Start(e) | XmlNode::Empty(e) => e.name.clone(),
            XmlNode::End(name) if name == "ASSET" => return Ok(asset),
            XmlNode::Eof => return Err(IngestError::Malformed("document ended inside ASSET".into())),
            _ => continue,
        };
        let value = cursor.value_of(&node)?;
        match name.as_str() {
            "ROLE" => asset.role = value,
            "HOST_NAME" if value != HOST_NAME_PLACEHOLDER => asset.host_name = value,
            "HOST_IP" => asset.ip_address = value,
            "HOST_MAC" => asset.mac_address = value,
            "HOST_FQDN" => asset.fqdn = value,
            "TECH_AREA" => asset.tech_area = value,
            "WEB_DB_SITE" => asset.web_db_site = value,
            "WEB_DB_INSTANCE" => asset.web_db_instance = value,
            _ => {}
        }
    }
}

fn persist_asset(
    session: &ImportSession<'_>,
    ctx: &CklContext<'_>,
    asset: AssetInfo,
) -> Result<CklHost> {
    let ip_field = (asset.ip_address != IP_PLACEHOLDER).then_some(asset.ip_address.as_str());
    let mac_field = (asset.mac_address != MAC_PLACEHOLDER).then_some(asset.mac_address.as_str());

    let first_ip = ip_field
        .and_then(|ip| IPV4_ADDRESS.find(ip).or_else(|| IPV6_ADDRESS.find(ip)))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let name = if !asset.host_name.is_empty() {
        asset.host_name.clone()
    } else if !first_ip.is_empty() {
        first_ip.clone()
    } else {
        ctx.file.stem()
    };

    let host = Host::new(&name)
        .with_fqdn(&asset.fqdn)
        .with_role(&asset.role)
        .with_scan_ip(&first_ip)
        .virtual_server(false);
    let host_id = session.insert_or_update_host(&host)?;
    session.map_host_to_group(host_id, &ctx.file.group_name)?;

    for field in [ip_field, mac_field].into_iter().flatten() {
        for ip in IPV4_ADDRESS.find_iter(field).chain(IPV6_ADDRESS.find_iter(field)) {
            session.insert_or_map_ip_address(host_id, ip.as_str())?;
        }
        for mac in MAC_ADDRESS.find_iter(field) {
            session.insert_or_map_mac_address(host_id, mac.as_str())?;
        }
    }

    Ok(CklHost {
        host_id,
        name,
        tech_area: non_empty(&asset.tech_area),
        web_db_site: non_empty(&asset.web_db_site),
        web_db_instance: non_empty(&asset.web_db_instance),
    })
}

fn read_stig_info<R: BufRead>(cursor: &mut XmlCursor<R>) -> Result<VulnerabilitySource> {
    let mut title = String::new();
    let mut source = VulnerabilitySource::default();
    let mut release_info = String::new();

    loop {
        match cursor.next_node()? {
            XmlNode::Start(e) if e.name == "STIG_TITLE" => title = cursor.read_text("STIG_TITLE")?,
            XmlNode::Start(e) if e.name == "SI_DATA" => {
                let (name, data) = read_pair(cursor, "SI_DATA", "SID_NAME", "SID_DATA")?;
                match name.as_str() {
                    "title" => title = data,
                    "version" => {
                        let (version, release) = normalize::split_stig_version(&data);
                        source.version = version;
                        source.release = release;
                    }
                    "releaseinfo" => release_info = data,
                    "stigid" => source.secondary_identifier = data,
                    "description" => source.description = data,
                    "filename" => source.file_name = data,
                    _ => {}
                }
            }
            XmlNode::End(name) if name == "STIG_INFO" => break,
            XmlNode::Eof => {
                return Err(IngestError::Malformed("document ended inside STIG_INFO".into()));
            }
            _ => {}
        }
    }

    source.name = normalize::sanitize_source(&title.replace('_', " "));
    if !release_info.is_empty() {
        source.published_date = Some(normalize::parse_release_date(&release_info).inspect_err(
            |err| error!(source = %source.name, value = %release_info, error = %err, "unable to parse STIG release date"),
        )?);
        if source.release.is_empty() {
            source.release = normalize::release_from_info(&release_info).unwrap_or_default();
        }
    }
    Ok(source)
}

/// A `<parent><key_tag>k</key_tag><value_tag>v</value_tag></parent>` pair.
/// A missing value tag yields an empty value.
fn read_pair<R: BufRead>(
    cursor: &mut XmlCursor<R>,
    parent: &str,
    key_tag: &str,
    value_tag: &str,
) -> Result<(String, String)> {
    let mut key = String::new();
    let mut value = String::new();
    loop {
        let node = cursor.next_node()?;
        match &node {
            XmlNode::Start(e) | XmlNode::Empty(e) if e.name == key_tag => {
                key = cursor.value_of(&node)?;
            }
            XmlNode::Start(e) | XmlNode::Empty(e) if e.name == value_tag => {
                value = cursor.value_of(&node)?;
            }
            XmlNode::End(name) if name == parent => return Ok((key, value)),
            XmlNode::Eof => {
                return Err(IngestError::Malformed(format!("document ended inside {parent}")));
            }
            _ => {}
        }
    }
}

fn read_vuln<R: BufRead>(cursor: &mut XmlCursor<R>) -> Result<VulnRecord> {
    let mut record = VulnRecord::default();
    loop {
        let node = cursor.next_node()?;
        let name = match &node {
            XmlNode::Start(e) | XmlNode::Empty(e) => e.name.clone(),
            XmlNode::End(name) if name == "VULN" => return Ok(record),
            XmlNode::Eof => return Err(IngestError::Malformed("document ended inside VULN".into())),
            _ => continue,
        };

        if name == "STIG_DATA" {
            if matches!(node, XmlNode::Empty(_)) {
                continue;
            }
            let (attribute, data) =
                read_pair(cursor, "STIG_DATA", "VULN_ATTRIBUTE", "ATTRIBUTE_DATA")?;
            if let Some(field) = VulnField::from_attribute(&attribute) {
                record.set(field, data.replace("&gt", ">").replace("&lt", "<"));
            }
            continue;
        }

        let value = cursor.value_of(&node)?;
        match name.as_str() {
            "STATUS" => record.status = normalize::to_status(&value),
            "FINDING_DETAILS" => record.finding_details = value,
            "COMMENTS" => record.comments = value,
            "SEVERITY_OVERRIDE" => record.severity_override = value,
            "SEVERITY_JUSTIFICATION" => record.severity_justification = value,
            _ => {}
        }
    }
}

fn import_vuln(session: &ImportSession<'_>, ctx: &mut CklContext<'_>, record: VulnRecord) -> Result<()> {
    let host = ctx
        .host
        .as_ref()
        .ok_or_else(|| IngestError::Malformed("VULN before ASSET".into()))?;
    let source_id = ctx
        .source_id
        .ok_or_else(|| IngestError::Malformed("VULN before STIG_INFO".into()))?;
    let rule_id = record.vulnerability.unique_identifier.as_str();
    if rule_id.is_empty() {
        return Err(IngestError::Malformed("VULN without Rule_ID".into()));
    }

    ctx.seen
        .entry(ctx.source_name.clone())
        .or_default()
        .insert(rule_id.to_string());

    let instance = record.instance_identifier(&host.name);
    let version = record.vulnerability.version.as_str();
    let scope = FindingScope {
        host_id: host.host_id,
        finding_type: FindingType::Ckl,
        vulnerability_identifier: rule_id,
        instance_identifier: &instance,
    };

    let comparison = session.compare_vulnerability_versions(&scope, version, "")?;
    let vulnerability_id = match comparison {
        VersionComparison::RecordNotFound => insert_vulnerability(session, &record, source_id)?,
        VersionComparison::IngestedVersionIsNewer => {
            let id = insert_vulnerability(session, &record, source_id)?;
            for outdated in session.select_outdated_vulnerabilities(&scope, version, "", false)? {
                session.update_unique_finding_status_by_id(outdated, Status::Completed)?;
            }
            id
        }
        VersionComparison::ExistingVersionIsNewer => {
            session.update_vulnerability_dates(&scope, ctx.observed)?;
            session.update_delta_analysis_flags(&scope, true)?;
            warn!(rule_id, host = %host.name, revision = version, "checklist carries an older rule revision");
            return Ok(());
        }
        VersionComparison::IdenticalVersions => {
            session.update_vulnerability_dates(&scope, ctx.observed)?;
            insert_vulnerability(session, &record, source_id)?
        }
    };

    let mut finding = UniqueFinding::new(
        instance.as_str(),
        FindingType::Ckl,
        host.host_id,
        vulnerability_id,
        source_id,
        ctx.observed,
    )
    .with_status(record.status)
    .with_source_file_name(&ctx.file.file_name);
    if record.finding_details.contains(TOOL_OUTPUT_MARKER) {
        finding.tool_generated_output = non_empty(&record.finding_details);
    } else {
        finding.finding_details = non_empty(&record.finding_details);
    }
    finding.comments = non_empty(&record.comments);
    finding.severity_override = non_empty(&record.severity_override);
    finding.severity_override_justification = non_empty(&record.severity_justification);
    finding.classification = non_empty(&record.classification);
    finding.technology_area = host.tech_area.clone();
    finding.web_db_site = host.web_db_site.clone();
    finding.web_db_instance = host.web_db_instance.clone();
    session.insert_or_update_unique_finding(&finding)?;

    for cci in record.ccis.iter().filter(|c| !c.trim().is_empty()) {
        session.map_vulnerability_to_cci(vulnerability_id, cci)?;
    }
    Ok(())
}

fn insert_vulnerability(session: &ImportSession<'_>, record: &VulnRecord, source_id: i64) -> Result<i64> {
    let mut vulnerability = record.vulnerability.clone();
    vulnerability.modified_date = Local::now().date_naive().format("%F").to_string();
    let id = session.insert_vulnerability(&vulnerability)?;
    session.map_vulnerability_to_source(id, source_id)?;
    Ok(id)
}

// ------------------------------------------------------------------
// Identifier pre-scan
// ------------------------------------------------------------------

/// Host identifiers found in a checklist's ASSET block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CklIdentifiers {
    pub host_name: String,
    pub ip_address: String,
    pub mac_address: String,
}

impl CklIdentifiers {
    /// Whether every identifier the settings require is present and is not
    /// the STIG Viewer placeholder.
    pub fn satisfies(&self, settings: &Settings) -> bool {
        let provided = |value: &str, placeholder: &str| {
            !value.trim().is_empty() && !value.contains(placeholder)
        };
        (!settings.ckl_requires_host_name || provided(&self.host_name, HOST_NAME_PLACEHOLDER))
            && (!settings.ckl_requires_ip_address || provided(&self.ip_address, IP_PLACEHOLDER))
            && (!settings.ckl_requires_mac_address || provided(&self.mac_address, MAC_PLACEHOLDER))
    }
}

/// Read HOST_NAME, HOST_IP and HOST_MAC without importing anything.
pub fn scan_identifiers(path: &Path) -> Result<CklIdentifiers> {
    let mut cursor = XmlCursor::open(path)?;
    let mut identifiers = CklIdentifiers::default();
    loop {
        let node = cursor.next_node()?;
        let name = match &node {
            XmlNode::Start(e) | XmlNode::Empty(e) => e.name.clone(),
            XmlNode::End(name) if name == "ASSET" => break,
            XmlNode::Eof => break,
            _ => continue,
        };
        match name.as_str() {
            "HOST_NAME" => identifiers.host_name = cursor.value_of(&node)?,
            "HOST_IP" => identifiers.ip_address = cursor.value_of(&node)?,
            "HOST_MAC" => identifiers.mac_address = cursor.value_of(&node)?,
            _ => {}
        }
    }
    Ok(identifiers)
}

/// Whether the checklist carries the identifiers the settings require.
/// Unreadable checklists fail the check.
pub fn obtain_identifiers(path: &Path, settings: &Settings) -> bool {
    match scan_identifiers(path) {
        Ok(identifiers) => identifiers.satisfies(settings),
        Err(err) => {
            error!(path = %path.display(), error = %err, "unable to read checklist identifiers");
            false
        }
    }
}
