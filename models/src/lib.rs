mod risk;
mod status;
mod finding_type;
mod host;
mod software;
mod source;
mod vulnerability;
mod finding;
mod scanned_file;
mod version;

pub use risk::RawRisk;
pub use status::Status;
pub use finding_type::FindingType;
pub use host::Host;
pub use software::{PortService, Software};
pub use source::VulnerabilitySource;
pub use vulnerability::{Cvss, Vulnerability, VulnerabilityReference};
pub use finding::{FindingScope, FindingSummary, UniqueFinding};
pub use scanned_file::{ScannedFile, DEFAULT_GROUP};
pub use version::{compare_revisions, VersionComparison};
