use chrono::NaiveDateTime;

use crate::{FindingType, RawRisk, Status};

/// One observed instance of a vulnerability on a host.
///
/// `(instance_identifier, finding_type)` is unique in the store; importing the
/// same pair again updates the existing row.
#[derive(Clone, Debug, PartialEq)]
pub struct UniqueFinding {
    /// Database row id (`None` for findings not yet persisted).
    pub id: Option<i64>,
    pub instance_identifier: String,
    pub finding_type: FindingType,
    pub host_id: i64,
    pub vulnerability_id: i64,
    pub source_id: i64,
    pub port_id: Option<i64>,
    pub status: Status,
    pub first_discovered: NaiveDateTime,
    pub last_observed: NaiveDateTime,
    pub delta_analysis_required: bool,
    pub comments: Option<String>,
    pub finding_details: Option<String>,
    pub tool_generated_output: Option<String>,
    pub severity_override: Option<String>,
    pub severity_override_justification: Option<String>,
    pub classification: Option<String>,
    pub technology_area: Option<String>,
    pub web_db_site: Option<String>,
    pub web_db_instance: Option<String>,
    pub source_file_name: String,
}

impl UniqueFinding {
    pub fn new(
        instance_identifier: impl Into<String>,
        finding_type: FindingType,
        host_id: i64,
        vulnerability_id: i64,
        source_id: i64,
        observed: NaiveDateTime,
    ) -> Self {
        Self {
            id: None,
            instance_identifier: instance_identifier.into(),
            finding_type,
            host_id,
            vulnerability_id,
            source_id,
            port_id: None,
            status: Status::Ongoing,
            first_discovered: observed,
            last_observed: observed,
            delta_analysis_required: false,
            comments: None,
            finding_details: None,
            tool_generated_output: None,
            severity_override: None,
            severity_override_justification: None,
            classification: None,
            technology_area: None,
            web_db_site: None,
            web_db_instance: None,
            source_file_name: String::new(),
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_port(mut self, port_id: Option<i64>) -> Self {
        self.port_id = port_id;
        self
    }

    pub fn with_source_file_name(mut self, name: impl Into<String>) -> Self {
        self.source_file_name = name.into();
        self
    }
}

/// The findings a reconciliation step applies to: every revision of one
/// vulnerability recorded for one host by one finding type.
///
/// `instance_identifier` narrows the scope further for strict lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FindingScope<'a> {
    pub host_id: i64,
    pub finding_type: FindingType,
    pub vulnerability_identifier: &'a str,
    pub instance_identifier: &'a str,
}

/// Flattened, read-only view of a finding joined with its host, vulnerability
/// and source.
#[derive(Clone, Debug, PartialEq)]
pub struct FindingSummary {
    pub id: i64,
    pub instance_identifier: String,
    pub finding_type: FindingType,
    pub host_name: String,
    pub vulnerability_identifier: String,
    pub title: String,
    pub raw_risk: RawRisk,
    pub status: Status,
    pub first_discovered: NaiveDateTime,
    pub last_observed: NaiveDateTime,
    pub delta_analysis_required: bool,
    pub source_name: String,
    pub source_file_name: String,
}
