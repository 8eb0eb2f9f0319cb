use tracing::warn;

/// Import toggles, read once per import call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Map ACAS port/protocol/service triples to hosts and findings.
    pub capture_acas_ports: bool,
    /// Record CVE / CPE / BID / xref references for ACAS plugins.
    pub capture_acas_references: bool,
    /// Run the software enumeration parsers on plugins 20811, 22869 and 29217.
    pub capture_acas_software: bool,
    pub ckl_requires_host_name: bool,
    pub ckl_requires_ip_address: bool,
    pub ckl_requires_mac_address: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            capture_acas_ports: true,
            capture_acas_references: true,
            capture_acas_software: true,
            ckl_requires_host_name: true,
            ckl_requires_ip_address: false,
            ckl_requires_mac_address: false,
        }
    }
}

impl Settings {
    /// Defaults overridden by `SCANMERGE_*` environment variables
    /// (`1`/`true`/`yes`/`on` or `0`/`false`/`no`/`off`).
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |name: &str, default: bool| match lookup(name) {
            None => default,
            Some(raw) => parse_flag(&raw).unwrap_or_else(|| {
                warn!(variable = name, value = %raw, "ignoring unrecognised flag value");
                default
            }),
        };

        Self {
            capture_acas_ports: flag("SCANMERGE_CAPTURE_ACAS_PORTS", defaults.capture_acas_ports),
            capture_acas_references: flag(
                "SCANMERGE_CAPTURE_ACAS_REFERENCES",
                defaults.capture_acas_references,
            ),
            capture_acas_software: flag(
                "SCANMERGE_CAPTURE_ACAS_SOFTWARE",
                defaults.capture_acas_software,
            ),
            ckl_requires_host_name: flag(
                "SCANMERGE_CKL_REQUIRES_HOST_NAME",
                defaults.ckl_requires_host_name,
            ),
            ckl_requires_ip_address: flag(
                "SCANMERGE_CKL_REQUIRES_IP_ADDRESS",
                defaults.ckl_requires_ip_address,
            ),
            ckl_requires_mac_address: flag(
                "SCANMERGE_CKL_REQUIRES_MAC_ADDRESS",
                defaults.ckl_requires_mac_address,
            ),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
