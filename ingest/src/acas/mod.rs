//! ACAS / Nessus (`.nessus`) reader.

mod software;

use std::io::BufRead;

use chrono::{Local, NaiveDateTime, NaiveTime};
use models::{
    Cvss, FindingType, Host, PortService, RawRisk, ScannedFile, Software, Status,
    UniqueFinding, Vulnerability, VulnerabilityReference, VulnerabilitySource,
};
use storage::{Database, ImportSession};
use tracing::{debug, error};

use crate::error::{IngestError, Result};
use crate::normalize::{
    self, MAC_ADDRESS, PLUGIN_AUTHENTICATION_FAILURE, PLUGIN_NOT_ADMIN, PLUGIN_SCAN_INFO,
};
use crate::settings::Settings;
use crate::xml::{Element, XmlCursor, XmlNode};

pub const ACAS_SOURCE_NAME: &str = "Tenable Nessus Scanner";
pub const ACAS_SECONDARY_IDENTIFIER: &str = "Assured Compliance Assessment Solution (ACAS)";
const VERSION_UNKNOWN: &str = "Version Unknown";
const RELEASE_UNKNOWN: &str = "Release Unknown";

/// State carried across every host of one file.
struct FileContext<'a> {
    file: &'a ScannedFile,
    settings: &'a Settings,
    scanner_version: Option<String>,
    scanner_release: Option<String>,
    /// Observation date used when a host has no `HOST_END`.
    import_date: NaiveDateTime,
}

impl FileContext<'_> {
    fn source(&self) -> VulnerabilitySource {
        let known = |v: &Option<String>, fallback: &str| {
            v.clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        VulnerabilitySource::new(ACAS_SOURCE_NAME)
            .with_secondary_identifier(ACAS_SECONDARY_IDENTIFIER)
            .with_version(known(&self.scanner_version, VERSION_UNKNOWN))
            .with_release(known(&self.scanner_release, RELEASE_UNKNOWN))
    }
}

/// `HostProperties` tags, keyed by their `name` attribute.
#[derive(Debug, Default)]
struct HostProperties {
    hostname: String,
    operating_system: String,
    fqdn: String,
    host_ip: String,
    mac_address: String,
    netbios: String,
    host_end: Option<NaiveDateTime>,
}

/// The persisted host a `ReportHost` block is describing.
struct HostContext {
    host_id: i64,
    name: String,
    observed: NaiveDateTime,
    authentication_failed: bool,
    not_admin: bool,
}

/// One `ReportItem`, drafted fresh for every plugin result.
#[derive(Debug, Default)]
struct ReportItem {
    plugin_id: String,
    plugin_name: String,
    plugin_family: String,
    port: String,
    protocol: String,
    service: String,
    description: String,
    synopsis: String,
    solution: String,
    risk_factor: RawRisk,
    stig_severity: String,
    plugin_output: String,
    references: Vec<VulnerabilityReference>,
    cvss: Cvss,
    published_date: String,
    modified_date: String,
    patch_published_date: String,
    version: String,
    release: String,
}

impl ReportItem {
    fn instance_identifier(&self, host_name: &str) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            host_name, self.plugin_id, self.port, self.protocol, self.service
        )
    }

    fn to_vulnerability(&self) -> Vulnerability {
        Vulnerability {
            unique_identifier: self.plugin_id.clone(),
            title: self.plugin_name.clone(),
            description: self.description.clone(),
            family: self.plugin_family.clone(),
            raw_risk: self.risk_factor,
            secondary_raw_risk: self.stig_severity.clone(),
            risk_statement: self.synopsis.clone(),
            fix_text: self.solution.clone(),
            cvss: self.cvss.clone(),
            version: self.version.clone(),
            release: self.release.clone(),
            published_date: self.published_date.clone(),
            modified_date: self.modified_date.clone(),
            fix_published_date: self.patch_published_date.clone(),
            ..Default::default()
        }
    }
}

/// Import one `.nessus` file inside a single transaction.
pub(crate) fn import(db: &mut Database, file: &ScannedFile, settings: &Settings) -> Result<()> {
    let mut cursor = XmlCursor::open(&file.file_path)?;
    let session = db.begin_import(file)?;
    let mut ctx = FileContext {
        file,
        settings,
        scanner_version: None,
        scanner_release: None,
        import_date: Local::now().date_naive().and_time(NaiveTime::MIN),
    };

    let mut hosts = 0usize;
    loop {
        match cursor.next_node()? {
            XmlNode::Start(e) if e.name == "ReportHost" => {
                import_host(&mut cursor, &session, &mut ctx, &e)?;
                hosts += 1;
            }
            XmlNode::Eof => break,
            _ => {}
        }
    }

    session.commit()?;
    debug!(file = %file.file_name, hosts, "ACAS file imported");
    Ok(())
}

fn import_host<R: BufRead>(
    cursor: &mut XmlCursor<R>,
    session: &ImportSession<'_>,
    ctx: &mut FileContext<'_>,
    report_host: &Element,
) -> Result<()> {
    let report_host_name = report_host.attr_or_empty("name");
    let mut host: Option<HostContext> = None;

    loop {
        match cursor.next_node()? {
            XmlNode::Start(e) if e.name == "HostProperties" => {
                let properties = read_host_properties(cursor, &report_host_name)?;
                host = Some(persist_host(session, ctx, &report_host_name, &properties)?);
            }
            XmlNode::Start(e) if e.name == "ReportItem" => {
                let item = read_report_item(cursor, &e)?;
                let host = host.as_mut().ok_or_else(|| {
                    IngestError::Malformed(format!(
                        "ReportItem before HostProperties for {report_host_name}"
                    ))
                })?;
                import_item(session, ctx, host, item)?;
            }
            XmlNode::End(name) if name == "ReportHost" => break,
            XmlNode::Eof => {
                return Err(IngestError::Malformed(format!(
                    "document ended inside ReportHost {report_host_name}"
                )));
            }
            _ => {}
        }
    }

    let Some(host) = host else {
        debug!(host = %report_host_name, "ReportHost without properties skipped");
        return Ok(());
    };

    session.set_credentialed_scan_status(host.host_id, host.authentication_failed, host.not_admin)?;
    if !host.authentication_failed && !host.not_admin {
        let stale =
            session.select_outdated_unique_findings(host.host_id, FindingType::Acas, host.observed)?;
        for id in &stale {
            session.update_unique_finding_status_by_id(*id, Status::Completed)?;
        }
        if !stale.is_empty() {
            debug!(host = %host.name, completed = stale.len(), "closed findings missing from this scan");
        }
    }
    Ok(())
}

fn read_host_properties<R: BufRead>(
    cursor: &mut XmlCursor<R>,
    report_host_name: &str,
) -> Result<HostProperties> {
    let mut properties = HostProperties::default();
    loop {
        match cursor.next_node()? {
            XmlNode::Start(e) if e.name == "tag" => {
                let value = cursor.read_text("tag")?;
                match e.attr("name").unwrap_or_default() {
                    "hostname" => properties.hostname = value,
                    "operating-system" => properties.operating_system = value,
                    "host-fqdn" => properties.fqdn = value,
                    "host-ip" => properties.host_ip = value,
                    "mac-address" => properties.mac_address = value,
                    "netbios-name" => properties.netbios = value,
                    "HOST_END" => {
                        let observed = normalize::scan_date(&value).inspect_err(|err| {
                            error!(host = %report_host_name, value = %value, error = %err, "unable to parse HOST_END");
                        })?;
                        properties.host_end = Some(observed);
                    }
                    _ => {}
                }
            }
            XmlNode::End(name) if name == "HostProperties" => return Ok(properties),
            XmlNode::Eof => {
                return Err(IngestError::Malformed("document ended inside HostProperties".into()));
            }
            _ => {}
        }
    }
}

fn persist_host(
    session: &ImportSession<'_>,
    ctx: &FileContext<'_>,
    report_host_name: &str,
    properties: &HostProperties,
) -> Result<HostContext> {
    let name = [
        properties.hostname.as_str(),
        properties.netbios.as_str(),
        properties.host_ip.as_str(),
        report_host_name,
    ]
    .into_iter()
    .find(|candidate| !candidate.is_empty())
    .unwrap_or_default()
    .to_string();
    let scan_ip = if properties.host_ip.is_empty() {
        report_host_name.to_string()
    } else {
        properties.host_ip.clone()
    };

    let host = Host::new(&name)
        .with_fqdn(&properties.fqdn)
        .with_netbios(&properties.netbios)
        .with_operating_system(&properties.operating_system)
        .with_scan_ip(&scan_ip);
    let host_id = session.insert_or_update_host(&host)?;
    session.map_host_to_group(host_id, &ctx.file.group_name)?;
    session.insert_or_map_ip_address(host_id, &scan_ip)?;
    for mac in MAC_ADDRESS.find_iter(&properties.mac_address) {
        session.insert_or_map_mac_address(host_id, mac.as_str())?;
    }
    if !properties.operating_system.is_empty() {
        session.insert_or_map_software(
            host_id,
            &Software::operating_system(&properties.operating_system),
        )?;
    }

    Ok(HostContext {
        host_id,
        name,
        observed: properties.host_end.unwrap_or(ctx.import_date),
        authentication_failed: false,
        not_admin: false,
    })
}

fn read_report_item<R: BufRead>(cursor: &mut XmlCursor<R>, element: &Element) -> Result<ReportItem> {
    let mut item = ReportItem {
        plugin_id: element.attr_or_empty("pluginID"),
        plugin_name: element.attr_or_empty("pluginName"),
        plugin_family: element.attr_or_empty("pluginFamily"),
        port: element.attr_or_empty("port"),
        protocol: element.attr_or_empty("protocol"),
        service: element.attr_or_empty("svc_name"),
        ..Default::default()
    };

    loop {
        let node = cursor.next_node()?;
        let name = match &node {
            XmlNode::Start(e) | XmlNode::Empty(e) => e.name.clone(),
            XmlNode::End(name) if name == "ReportItem" => return Ok(item),
            XmlNode::Eof => {
                return Err(IngestError::Malformed(format!(
                    "document ended inside ReportItem {}",
                    item.plugin_id
                )));
            }
            _ => continue,
        };
        let value = cursor.value_of(&node)?;

        match name.as_str() {
            "description" => item.description = value,
            "synopsis" => item.synopsis = value,
            "solution" => item.solution = value,
            "risk_factor" => item.risk_factor = RawRisk::from_risk_factor(&value),
            "stig_severity" => item.stig_severity = value,
            "plugin_output" => item.plugin_output = value,
            "plugin_publication_date" => item.published_date = value,
            "plugin_modification_date" => item.modified_date = value,
            "patch_publication_date" => item.patch_published_date = value,
            "script_version" => {
                let (version, release) = normalize::parse_script_version(&value);
                item.version = version;
                item.release = release;
            }
            "xref" => {
                let reference = VulnerabilityReference::from_xref(&value).ok_or_else(|| {
                    error!(plugin_id = %item.plugin_id, value = %value, "malformed xref");
                    IngestError::Malformed(format!("xref '{value}' on plugin {}", item.plugin_id))
                })?;
                item.references.push(reference);
            }
            "cve" => item.references.push(VulnerabilityReference::new(value, "CVE")),
            "cpe" => item.references.push(VulnerabilityReference::new(value, "CPE")),
            "bid" => item.references.push(VulnerabilityReference::new(value, "BID")),
            "cvss_base_score" => item.cvss.base_score = value.parse().ok(),
            "cvss_temporal_score" => item.cvss.temporal_score = value.parse().ok(),
            "cvss_vector" => item.cvss.base_vector = value,
            "cvss_temporal_vector" => item.cvss.temporal_vector = value,
            _ => {}
        }
    }
}

fn import_item(
    session: &ImportSession<'_>,
    ctx: &mut FileContext<'_>,
    host: &mut HostContext,
    item: ReportItem,
) -> Result<()> {
    match item.plugin_id.as_str() {
        PLUGIN_SCAN_INFO => {
            let (version, release) = normalize::parse_scanner_version(&item.plugin_output);
            if version.is_some() {
                ctx.scanner_version = version;
            }
            if release.is_some() {
                ctx.scanner_release = release;
            }
        }
        PLUGIN_AUTHENTICATION_FAILURE => host.authentication_failed = true,
        PLUGIN_NOT_ADMIN => host.not_admin = true,
        _ => {}
    }

    persist_item(session, ctx, host, &item).inspect_err(|err| {
        error!(plugin_id = %item.plugin_id, host = %host.name, error = %err, "unable to import plugin result");
    })
}

fn persist_item(
    session: &ImportSession<'_>,
    ctx: &FileContext<'_>,
    host: &HostContext,
    item: &ReportItem,
) -> Result<()> {
    let source_id = session.insert_or_get_source(&ctx.source())?;
    let instance = item.instance_identifier(&host.name);
    let vulnerability_id = session.insert_vulnerability(&item.to_vulnerability())?;
    session.map_vulnerability_to_source(vulnerability_id, source_id)?;

    let port_id = if ctx.settings.capture_acas_ports {
        let port = PortService::new(&item.port, &item.protocol, &item.service);
        Some(session.insert_or_map_port(host.host_id, &port)?)
    } else {
        None
    };

    let mut finding = UniqueFinding::new(
        instance.as_str(),
        FindingType::Acas,
        host.host_id,
        vulnerability_id,
        source_id,
        host.observed,
    )
    .with_port(port_id)
    .with_source_file_name(&ctx.file.file_name);
    if !item.plugin_output.is_empty() {
        finding.tool_generated_output = Some(item.plugin_output.clone());
    }
    session.insert_or_update_unique_finding(&finding)?;

    if ctx.settings.capture_acas_references {
        session.insert_or_map_vulnerability_references(vulnerability_id, &item.references)?;
    }
    if ctx.settings.capture_acas_software {
        for package in software::enumerate(&item.plugin_id, &item.plugin_output) {
            session.insert_or_map_software(host.host_id, &package)?;
        }
    }
    Ok(())
}
