use rusqlite::Connection;

use crate::error::Result;

const SCHEMA_SQL: &str = r#"
-- One row per ingested file
CREATE TABLE IF NOT EXISTS scanned_files (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name   TEXT NOT NULL,
    file_path   TEXT NOT NULL,
    group_name  TEXT NOT NULL,
    imported_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS hosts (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    discovered_host_name TEXT NOT NULL,
    displayed_host_name  TEXT NOT NULL DEFAULT '',
    fqdn                 TEXT NOT NULL DEFAULT '',
    netbios              TEXT NOT NULL DEFAULT '',
    operating_system     TEXT NOT NULL DEFAULT '',
    scan_ip              TEXT NOT NULL DEFAULT '',
    group_name           TEXT NOT NULL DEFAULT '',
    role                 TEXT NOT NULL DEFAULT '',
    is_virtual_server    INTEGER NOT NULL DEFAULT 0,
    credentialed_scan    INTEGER,
    UNIQUE (discovered_host_name, scan_ip, group_name)
);

CREATE TABLE IF NOT EXISTS group_hosts (
    group_id INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    host_id  INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    PRIMARY KEY (group_id, host_id)
);

CREATE TABLE IF NOT EXISTS ip_addresses (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS host_ip_addresses (
    host_id       INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    ip_address_id INTEGER NOT NULL REFERENCES ip_addresses(id) ON DELETE CASCADE,
    PRIMARY KEY (host_id, ip_address_id)
);

CREATE TABLE IF NOT EXISTS mac_addresses (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS host_mac_addresses (
    host_id        INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    mac_address_id INTEGER NOT NULL REFERENCES mac_addresses(id) ON DELETE CASCADE,
    PRIMARY KEY (host_id, mac_address_id)
);

CREATE TABLE IF NOT EXISTS software (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    name              TEXT NOT NULL,
    version           TEXT NOT NULL DEFAULT '',
    is_os_or_firmware INTEGER NOT NULL DEFAULT 0,
    UNIQUE (name, version)
);

CREATE TABLE IF NOT EXISTS host_software (
    host_id      INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    software_id  INTEGER NOT NULL REFERENCES software(id) ON DELETE CASCADE,
    install_date TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (host_id, software_id)
);

CREATE TABLE IF NOT EXISTS ports_protocols_services (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    port     TEXT NOT NULL,
    protocol TEXT NOT NULL,
    service  TEXT NOT NULL DEFAULT '',
    UNIQUE (port, protocol, service)
);

CREATE TABLE IF NOT EXISTS host_ports (
    host_id INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    port_id INTEGER NOT NULL REFERENCES ports_protocols_services(id) ON DELETE CASCADE,
    PRIMARY KEY (host_id, port_id)
);

CREATE TABLE IF NOT EXISTS vulnerability_sources (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    name                 TEXT NOT NULL,
    secondary_identifier TEXT NOT NULL DEFAULT '',
    version              TEXT NOT NULL DEFAULT '',
    release              TEXT NOT NULL DEFAULT '',
    published_date       TEXT,
    description          TEXT NOT NULL DEFAULT '',
    file_name            TEXT NOT NULL DEFAULT '',
    UNIQUE (name, version, release)
);

CREATE TABLE IF NOT EXISTS vulnerabilities (
    id                         INTEGER PRIMARY KEY AUTOINCREMENT,
    unique_identifier          TEXT NOT NULL,
    group_identifier           TEXT NOT NULL DEFAULT '',
    group_title                TEXT NOT NULL DEFAULT '',
    secondary_identifier       TEXT NOT NULL DEFAULT '',
    title                      TEXT NOT NULL DEFAULT '',
    description                TEXT NOT NULL DEFAULT '',
    family                     TEXT NOT NULL DEFAULT '',
    raw_risk                   TEXT NOT NULL DEFAULT 'Unknown',
    secondary_raw_risk         TEXT NOT NULL DEFAULT '',
    risk_statement             TEXT NOT NULL DEFAULT '',
    fix_text                   TEXT NOT NULL DEFAULT '',
    check_content              TEXT NOT NULL DEFAULT '',
    false_positives            TEXT NOT NULL DEFAULT '',
    false_negatives            TEXT NOT NULL DEFAULT '',
    documentable               TEXT NOT NULL DEFAULT '',
    mitigations                TEXT NOT NULL DEFAULT '',
    potential_impacts          TEXT NOT NULL DEFAULT '',
    third_party_tools          TEXT NOT NULL DEFAULT '',
    mitigation_control         TEXT NOT NULL DEFAULT '',
    security_override_guidance TEXT NOT NULL DEFAULT '',
    cvss_base_score            REAL,
    cvss_temporal_score        REAL,
    cvss_base_vector           TEXT NOT NULL DEFAULT '',
    cvss_temporal_vector       TEXT NOT NULL DEFAULT '',
    version                    TEXT NOT NULL DEFAULT '',
    release                    TEXT NOT NULL DEFAULT '',
    published_date             TEXT NOT NULL DEFAULT '',
    modified_date              TEXT NOT NULL DEFAULT '',
    fix_published_date         TEXT NOT NULL DEFAULT '',
    UNIQUE (unique_identifier, version, release)
);
CREATE INDEX IF NOT EXISTS idx_vulnerability_uvi ON vulnerabilities(unique_identifier);

CREATE TABLE IF NOT EXISTS vulnerability_source_map (
    vulnerability_id INTEGER NOT NULL REFERENCES vulnerabilities(id) ON DELETE CASCADE,
    source_id        INTEGER NOT NULL REFERENCES vulnerability_sources(id) ON DELETE CASCADE,
    PRIMARY KEY (vulnerability_id, source_id)
);

CREATE TABLE IF NOT EXISTS vulnerability_references (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    reference      TEXT NOT NULL,
    reference_type TEXT NOT NULL,
    UNIQUE (reference, reference_type)
);

CREATE TABLE IF NOT EXISTS vulnerability_reference_map (
    vulnerability_id INTEGER NOT NULL REFERENCES vulnerabilities(id) ON DELETE CASCADE,
    reference_id     INTEGER NOT NULL REFERENCES vulnerability_references(id) ON DELETE CASCADE,
    PRIMARY KEY (vulnerability_id, reference_id)
);

CREATE TABLE IF NOT EXISTS ccis (
    cci INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS vulnerability_cci_map (
    vulnerability_id INTEGER NOT NULL REFERENCES vulnerabilities(id) ON DELETE CASCADE,
    cci              INTEGER NOT NULL REFERENCES ccis(cci) ON DELETE CASCADE,
    PRIMARY KEY (vulnerability_id, cci)
);

-- (instance_identifier, finding_type) is the identity of a finding across imports
CREATE TABLE IF NOT EXISTS unique_findings (
    id                             INTEGER PRIMARY KEY AUTOINCREMENT,
    instance_identifier            TEXT NOT NULL,
    finding_type                   TEXT NOT NULL,
    host_id                        INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    vulnerability_id               INTEGER NOT NULL REFERENCES vulnerabilities(id) ON DELETE CASCADE,
    source_id                      INTEGER NOT NULL REFERENCES vulnerability_sources(id) ON DELETE CASCADE,
    port_id                        INTEGER REFERENCES ports_protocols_services(id) ON DELETE SET NULL,
    status                         TEXT NOT NULL,
    first_discovered               TEXT NOT NULL,
    last_observed                  TEXT NOT NULL,
    delta_analysis_required        INTEGER NOT NULL DEFAULT 0,
    comments                       TEXT,
    finding_details                TEXT,
    tool_generated_output          TEXT,
    severity_override              TEXT,
    severity_override_justification TEXT,
    classification                 TEXT,
    technology_area                TEXT,
    web_db_site                    TEXT,
    web_db_instance                TEXT,
    scanned_file_id                INTEGER REFERENCES scanned_files(id) ON DELETE SET NULL,
    source_file_name               TEXT NOT NULL DEFAULT '',
    UNIQUE (instance_identifier, finding_type)
);
CREATE INDEX IF NOT EXISTS idx_finding_host ON unique_findings(host_id, finding_type);
CREATE INDEX IF NOT EXISTS idx_finding_vulnerability ON unique_findings(vulnerability_id);
"#;

/// Tables in dependency order, children first; used to wipe the store.
pub(crate) const TABLES: &[&str] = &[
    "unique_findings",
    "vulnerability_cci_map",
    "ccis",
    "vulnerability_reference_map",
    "vulnerability_references",
    "vulnerability_source_map",
    "vulnerabilities",
    "vulnerability_sources",
    "host_ports",
    "ports_protocols_services",
    "host_software",
    "software",
    "host_mac_addresses",
    "mac_addresses",
    "host_ip_addresses",
    "ip_addresses",
    "group_hosts",
    "groups",
    "hosts",
    "scanned_files",
];

/// Create every table and index if missing. Safe to run on every open.
pub(crate) fn initialize(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
