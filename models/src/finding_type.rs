/// Origin format of a unique finding.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum FindingType {
    Acas,
    Ckl,
    Wassp,
    Xccdf,
    Fpr,
}

impl FindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingType::Acas => "ACAS",
            FindingType::Ckl => "CKL",
            FindingType::Wassp => "WASSP",
            FindingType::Xccdf => "XCCDF",
            FindingType::Fpr => "FPR",
        }
    }
}

impl std::fmt::Display for FindingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FindingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ACAS" => Ok(FindingType::Acas),
            "CKL" => Ok(FindingType::Ckl),
            "WASSP" => Ok(FindingType::Wassp),
            "XCCDF" => Ok(FindingType::Xccdf),
            "FPR" => Ok(FindingType::Fpr),
            other => Err(format!("unknown finding type: {other}")),
        }
    }
}
