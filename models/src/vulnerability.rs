use crate::RawRisk;

/// CVSS scores and vectors attached to a vulnerability definition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cvss {
    pub base_score: Option<f64>,
    pub temporal_score: Option<f64>,
    pub base_vector: String,
    pub temporal_vector: String,
}

/// A vulnerability definition as published by its source.
///
/// Identity is `(unique_identifier, version, release)`: a newer revision of
/// the same rule or plugin is a distinct row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Vulnerability {
    /// Plugin id for ACAS, rule id for CKL, test id for WASSP.
    pub unique_identifier: String,
    pub group_identifier: String,
    pub group_title: String,
    pub secondary_identifier: String,
    pub title: String,
    pub description: String,
    pub family: String,
    pub raw_risk: RawRisk,
    pub secondary_raw_risk: String,
    pub risk_statement: String,
    pub fix_text: String,
    pub check_content: String,
    pub false_positives: String,
    pub false_negatives: String,
    pub documentable: String,
    pub mitigations: String,
    pub potential_impacts: String,
    pub third_party_tools: String,
    pub mitigation_control: String,
    pub security_override_guidance: String,
    pub cvss: Cvss,
    pub version: String,
    pub release: String,
    pub published_date: String,
    pub modified_date: String,
    pub fix_published_date: String,
}

impl Vulnerability {
    pub fn new(unique_identifier: impl Into<String>) -> Self {
        Self {
            unique_identifier: unique_identifier.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_raw_risk(mut self, raw_risk: RawRisk) -> Self {
        self.raw_risk = raw_risk;
        self
    }

    pub fn with_revision(mut self, version: impl Into<String>, release: impl Into<String>) -> Self {
        self.version = version.into();
        self.release = release.into();
        self
    }
}

/// External reference (CVE, IAVA, BID, CPE, ...) attached to a vulnerability.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VulnerabilityReference {
    pub reference: String,
    pub reference_type: String,
}

impl VulnerabilityReference {
    pub fn new(reference: impl Into<String>, reference_type: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            reference_type: reference_type.into(),
        }
    }

    /// Parse a Nessus `xref` value such as `IAVA:2020-A-0001`.
    pub fn from_xref(xref: &str) -> Option<Self> {
        let (kind, value) = xref.split_once(':')?;
        let (kind, value) = (kind.trim(), value.trim());
        if kind.is_empty() || value.is_empty() {
            return None;
        }
        Some(Self::new(value, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xref_splits_type_and_value() {
        let r = VulnerabilityReference::from_xref("IAVA:2020-A-0001").unwrap();
        assert_eq!(r.reference_type, "IAVA");
        assert_eq!(r.reference, "2020-A-0001");
    }

    #[test]
    fn test_xref_without_separator_is_rejected() {
        assert!(VulnerabilityReference::from_xref("MSFT").is_none());
        assert!(VulnerabilityReference::from_xref("CWE:").is_none());
    }
}
