/// A scanned host as discovered by one of the readers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Host {
    /// Database row id (`None` for hosts not yet persisted).
    pub id: Option<i64>,
    /// Name reported by the scanner; half of the host identity.
    pub discovered_host_name: String,
    pub displayed_host_name: String,
    pub fqdn: String,
    pub netbios: String,
    pub operating_system: String,
    /// Address the scan was run against; the other half of the identity.
    pub scan_ip: String,
    pub role: String,
    pub is_virtual_server: bool,
    /// `None` until an ACAS scan reports whether it authenticated.
    pub credentialed_scan: Option<bool>,
}

impl Host {
    pub fn new(discovered_host_name: impl Into<String>) -> Self {
        let name = discovered_host_name.into();
        Self {
            displayed_host_name: name.clone(),
            discovered_host_name: name,
            ..Default::default()
        }
    }

    pub fn with_fqdn(mut self, fqdn: impl Into<String>) -> Self {
        self.fqdn = fqdn.into();
        self
    }

    pub fn with_netbios(mut self, netbios: impl Into<String>) -> Self {
        self.netbios = netbios.into();
        self
    }

    pub fn with_operating_system(mut self, os: impl Into<String>) -> Self {
        self.operating_system = os.into();
        self
    }

    pub fn with_scan_ip(mut self, ip: impl Into<String>) -> Self {
        self.scan_ip = ip.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn virtual_server(mut self, is_virtual: bool) -> Self {
        self.is_virtual_server = is_virtual;
        self
    }
}
