use std::cmp::Ordering;

/// Outcome of comparing an ingested vulnerability revision with the stored one.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VersionComparison {
    RecordNotFound,
    IngestedVersionIsNewer,
    ExistingVersionIsNewer,
    IdenticalVersions,
}

impl VersionComparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionComparison::RecordNotFound => "Record Not Found",
            VersionComparison::IngestedVersionIsNewer => "Ingested Version Is Newer",
            VersionComparison::ExistingVersionIsNewer => "Existing Version Is Newer",
            VersionComparison::IdenticalVersions => "Identical Versions",
        }
    }

    /// Classify `ingested` against the newest stored `(version, release)`.
    pub fn classify(ingested: (&str, &str), existing: Option<(&str, &str)>) -> Self {
        let Some(existing) = existing else {
            return VersionComparison::RecordNotFound;
        };
        match compare_revisions(ingested, existing) {
            Ordering::Greater => VersionComparison::IngestedVersionIsNewer,
            Ordering::Less => VersionComparison::ExistingVersionIsNewer,
            Ordering::Equal => VersionComparison::IdenticalVersions,
        }
    }
}

impl std::fmt::Display for VersionComparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order two `(version, release)` pairs: version first, then release.
///
/// Numeric components compare numerically; a non-numeric or empty component
/// sorts below any number, and two non-numeric components compare as text.
pub fn compare_revisions(a: (&str, &str), b: (&str, &str)) -> Ordering {
    compare_component(a.0, b.0).then_with(|| compare_component(a.1, b.1))
}

fn compare_component(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.trim(), b.trim());
    match (a.parse::<u64>().ok(), b.parse::<u64>().ok()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}
