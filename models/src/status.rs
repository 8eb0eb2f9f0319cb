/// Lifecycle status of a unique finding.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Default)]
pub enum Status {
    Ongoing,
    Completed,
    NotAFinding,
    NotApplicable,
    NotReviewed,
    #[default]
    Unknown,
}

impl Status {
    pub const ALL: &[Status] = &[
        Status::Ongoing,
        Status::Completed,
        Status::NotAFinding,
        Status::NotApplicable,
        Status::NotReviewed,
        Status::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ongoing => "Ongoing",
            Status::Completed => "Completed",
            Status::NotAFinding => "Not A Finding",
            Status::NotApplicable => "Not Applicable",
            Status::NotReviewed => "Not Reviewed",
            Status::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace([' ', '_', '-'], "").as_str() {
            "ongoing" => Ok(Status::Ongoing),
            "completed" => Ok(Status::Completed),
            "notafinding" => Ok(Status::NotAFinding),
            "notapplicable" => Ok(Status::NotApplicable),
            "notreviewed" => Ok(Status::NotReviewed),
            "unknown" => Ok(Status::Unknown),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_display() {
        for status in Status::ALL {
            assert_eq!(status.to_string().parse::<Status>().unwrap(), *status);
        }
    }

    #[test]
    fn test_status_accepts_snake_case() {
        assert_eq!("not_applicable".parse::<Status>().unwrap(), Status::NotApplicable);
        assert!("closed".parse::<Status>().is_err());
    }
}
