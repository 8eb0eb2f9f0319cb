use chrono::NaiveDate;

/// The scanner or benchmark a vulnerability definition comes from.
///
/// Identity is `(name, version, release)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VulnerabilitySource {
    pub name: String,
    pub secondary_identifier: String,
    pub version: String,
    pub release: String,
    pub published_date: Option<NaiveDate>,
    pub description: String,
    pub file_name: String,
}

impl VulnerabilitySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_secondary_identifier(mut self, id: impl Into<String>) -> Self {
        self.secondary_identifier = id.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = release.into();
        self
    }

    pub fn with_published_date(mut self, date: Option<NaiveDate>) -> Self {
        self.published_date = date;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }
}
