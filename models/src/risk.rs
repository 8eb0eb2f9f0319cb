/// Raw risk category shared by every finding source (CAT I is the most severe).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Default)]
pub enum RawRisk {
    I,
    II,
    III,
    IV,
    #[default]
    Unknown,
}

impl RawRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            RawRisk::I => "I",
            RawRisk::II => "II",
            RawRisk::III => "III",
            RawRisk::IV => "IV",
            RawRisk::Unknown => "Unknown",
        }
    }

    /// Map a Nessus `risk_factor` value onto the category scale.
    pub fn from_risk_factor(risk_factor: &str) -> Self {
        match risk_factor.trim() {
            "None" => RawRisk::IV,
            "Low" => RawRisk::III,
            "Medium" => RawRisk::II,
            "High" | "Critical" => RawRisk::I,
            _ => RawRisk::Unknown,
        }
    }
}

impl std::fmt::Display for RawRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RawRisk {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        match normalized.trim_start_matches("CAT").trim() {
            "I" => Ok(RawRisk::I),
            "II" => Ok(RawRisk::II),
            "III" => Ok(RawRisk::III),
            "IV" => Ok(RawRisk::IV),
            "UNKNOWN" => Ok(RawRisk::Unknown),
            other => Err(format!("unknown raw risk: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_factor_mapping() {
        assert_eq!(RawRisk::from_risk_factor("None"), RawRisk::IV);
        assert_eq!(RawRisk::from_risk_factor("Low"), RawRisk::III);
        assert_eq!(RawRisk::from_risk_factor("Medium"), RawRisk::II);
        assert_eq!(RawRisk::from_risk_factor("High"), RawRisk::I);
        assert_eq!(RawRisk::from_risk_factor("Critical"), RawRisk::I);
        assert_eq!(RawRisk::from_risk_factor("Severe"), RawRisk::Unknown);
    }

    #[test]
    fn test_parse_with_cat_prefix() {
        assert_eq!("CAT II".parse::<RawRisk>().unwrap(), RawRisk::II);
        assert_eq!("iv".parse::<RawRisk>().unwrap(), RawRisk::IV);
        assert!("V".parse::<RawRisk>().is_err());
    }
}
