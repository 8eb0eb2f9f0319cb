use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use models::{RawRisk, Status};
use regex::Regex;

use crate::error::{IngestError, Result};

// ------------------------------------------------------------------
// Nessus plugin ids with special handling
// ------------------------------------------------------------------

/// Microsoft Windows installed software enumeration.
pub const PLUGIN_WINDOWS_SOFTWARE: &str = "20811";
/// Software enumeration over SSH (Debian or RPM based Linux).
pub const PLUGIN_LINUX_SOFTWARE: &str = "22869";
/// Solaris installed packages.
pub const PLUGIN_SOLARIS_SOFTWARE: &str = "29217";
/// Nessus scan information; carries the scanner and plugin feed versions.
pub const PLUGIN_SCAN_INFO: &str = "19506";
/// Authentication failure: local checks not run.
pub const PLUGIN_AUTHENTICATION_FAILURE: &str = "21745";
/// Credentials supplied but without administrative privileges.
pub const PLUGIN_NOT_ADMIN: &str = "26917";

// ------------------------------------------------------------------
// Patterns
// ------------------------------------------------------------------

pub(crate) static MAC_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{2}(?:[:-][0-9a-f]{2}){5}\b").expect("valid MAC regex")
});

pub(crate) static IPV4_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b")
        .expect("valid IPv4 regex")
});

pub(crate) static IPV6_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:[0-9a-f]{1,4}:){7}[0-9a-f]{1,4}\b|\b(?:[0-9a-f]{1,4}:){1,6}:(?:[0-9a-f]{1,4}(?::[0-9a-f]{1,4}){0,5})?",
    )
    .expect("valid IPv6 regex")
});

static STIG_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\D*(\d+)\.").expect("valid STIG version regex"));

static STIG_RELEASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(\d+)").expect("valid STIG release regex"));

static STIG_RELEASE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,2} [A-Za-z]{3} \d{4}\b").expect("valid STIG date regex")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

// ------------------------------------------------------------------
// Canonical values
// ------------------------------------------------------------------

/// Map a severity label from any source onto the raw risk scale.
pub fn to_raw_risk(value: &str) -> RawRisk {
    let normalized = value.trim().to_lowercase();
    match normalized.trim_start_matches("cat").trim() {
        "high" | "critical" | "i" => RawRisk::I,
        "medium" | "moderate" | "ii" => RawRisk::II,
        "low" | "iii" => RawRisk::III,
        "iv" | "info" | "informational" | "none" => RawRisk::IV,
        _ => RawRisk::Unknown,
    }
}

/// Map a status label from any source onto the canonical status set.
pub fn to_status(value: &str) -> Status {
    let normalized: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .collect::<String>()
        .to_lowercase();
    match normalized.as_str() {
        "open" | "fail" | "failed" | "ongoing" => Status::Ongoing,
        "notafinding" | "pass" | "passed" => Status::NotAFinding,
        "notapplicable" | "na" => Status::NotApplicable,
        "notreviewed" => Status::NotReviewed,
        "completed" | "closed" => Status::Completed,
        _ => Status::Unknown,
    }
}

/// Normalize a vulnerability source title: whitespace runs collapse, and the
/// long form "Security Technical Implementation Guide" becomes "STIG".
pub fn sanitize_source(title: &str) -> String {
    let collapsed = collapse_whitespace(title);
    collapsed
        .replace("Security Technical Implementation Guide", "STIG")
        .trim()
        .to_string()
}

pub(crate) fn collapse_whitespace(value: &str) -> String {
    WHITESPACE.replace_all(value.trim(), " ").into_owned()
}

// ------------------------------------------------------------------
// Revisions
// ------------------------------------------------------------------

/// Split a Nessus `script_version` into version and release.
///
/// `$Revision: 1.12 $` becomes `("1", "12")`: the version drops `$` and
/// anything up to `:`, the release keeps only digits. A value without a dot
/// is all version.
pub fn parse_script_version(value: &str) -> (String, String) {
    let Some((version, release)) = value.split_once('.') else {
        return (clean_script_version(value), String::new());
    };
    let release: String = release
        .split('.')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    (clean_script_version(version), release)
}

fn clean_script_version(version: &str) -> String {
    let version = version.replace('$', "");
    match version.split_once(':') {
        Some((_, rest)) => rest.trim().to_string(),
        None => version.trim().to_string(),
    }
}

/// Split a CKL `Rule_ID` (`SV-12345r5_rule`) into rule id and revision.
pub fn split_rule_id(rule_id: &str) -> (String, String) {
    let rule = rule_id.split('_').next().unwrap_or_default().trim();
    match rule.split_once('r') {
        Some((id, revision)) => (id.to_string(), revision.to_string()),
        None => (rule.to_string(), String::new()),
    }
}

/// Split a STIG `version` value. A value without a dot is kept whole as the
/// version; otherwise the digits either side of the first dot are used.
pub fn split_stig_version(value: &str) -> (String, String) {
    let value = value.trim();
    if !value.contains('.') {
        return (value.to_string(), String::new());
    }
    let capture = |re: &Regex| {
        re.captures(value)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };
    (capture(&STIG_VERSION), capture(&STIG_RELEASE))
}

/// Release date of a STIG from its `releaseinfo`
/// (`Release: 5 Benchmark Date: 27 Oct 2021`).
pub fn parse_release_date(release_info: &str) -> Result<NaiveDate> {
    let found = STIG_RELEASE_DATE
        .find(release_info)
        .ok_or_else(|| IngestError::NoMatch {
            what: "release date",
            value: release_info.to_string(),
        })?;
    NaiveDate::parse_from_str(found.as_str(), "%d %b %Y").map_err(|source| IngestError::Date {
        value: found.as_str().to_string(),
        source,
    })
}

/// Release named by the second space-separated token of `releaseinfo`.
pub fn release_from_info(release_info: &str) -> Option<String> {
    release_info
        .split(' ')
        .nth(1)
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Scanner and plugin feed versions from the output of plugin 19506.
pub fn parse_scanner_version(plugin_output: &str) -> (Option<String>, Option<String>) {
    let mut version = None;
    let mut release = None;
    for line in plugin_output.lines() {
        if line.contains("Nessus version") {
            version = line
                .split(':')
                .nth(1)
                .and_then(|v| v.split('(').next())
                .map(|v| v.trim().to_string());
        } else if line.contains("Plugin feed version") {
            release = line.split(':').nth(1).map(|v| v.trim().to_string());
        }
    }
    (version, release)
}

// ------------------------------------------------------------------
// Dates
// ------------------------------------------------------------------

/// Parse scanner timestamps such as `Tue Jun  4 14:43:24 2019`.
/// Line breaks are dropped and whitespace runs collapsed first.
pub fn parse_scanner_timestamp(value: &str) -> Result<NaiveDateTime> {
    let cleaned = collapse_whitespace(&value.replace(['\r', '\n'], " "));
    NaiveDateTime::parse_from_str(&cleaned, "%a %b %d %H:%M:%S %Y")
        .map_err(|source| IngestError::Date { value: value.to_string(), source })
}

/// Midnight of the day a scanner timestamp falls on.
pub fn scan_date(value: &str) -> Result<NaiveDateTime> {
    let parsed = parse_scanner_timestamp(value)?;
    Ok(parsed.date().and_time(chrono::NaiveTime::MIN))
}
