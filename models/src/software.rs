/// An installed package, operating system or firmware image seen on a host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Software {
    pub name: String,
    pub version: String,
    pub install_date: String,
    pub is_os_or_firmware: bool,
}

impl Software {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Operating system entry; the version is folded into the name by scanners.
    pub fn operating_system(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_os_or_firmware: true,
            ..Default::default()
        }
    }

    pub fn with_install_date(mut self, date: impl Into<String>) -> Self {
        self.install_date = date.into();
        self
    }
}

/// A listening port seen on a host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PortService {
    pub port: String,
    pub protocol: String,
    pub service: String,
}

impl PortService {
    pub fn new(
        port: impl Into<String>,
        protocol: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            port: port.into(),
            protocol: protocol.into(),
            service: service.into(),
        }
    }
}
