use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "scanmerge")]
#[command(version)]
#[command(about = "Merge ACAS, CKL and WASSP scan results into one findings store")]
pub struct Cli {
    /// the command to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import scan result files (.nessus, .ckl, WASSP .html/.htm/.xml)
    Import {
        /// Files to import, processed in order
        #[arg(short, long = "path", num_args = 1.., required = true)]
        paths: Vec<String>,

        /// Group the scanned hosts are filed under
        #[arg(short, long)]
        group: Option<String>,

        /// Skip ACAS port/protocol/service capture
        #[arg(long, default_value_t = false)]
        no_ports: bool,

        /// Skip ACAS CVE/CPE/BID/xref references
        #[arg(long, default_value_t = false)]
        no_references: bool,

        /// Skip ACAS installed software enumeration
        #[arg(long, default_value_t = false)]
        no_software: bool,
    },

    /// Check that a checklist names its host before importing it
    Identifiers {
        /// Path to the .ckl file
        #[arg(short, long)]
        path: String,
    },

    /// List unique findings
    Findings {
        /// Only findings for this host name
        #[arg(long)]
        host: Option<String>,

        /// Only findings of this type: ACAS, CKL, WASSP
        #[arg(long)]
        finding_type: Option<String>,

        /// Only findings with this status, e.g. Ongoing, Completed
        #[arg(long)]
        status: Option<String>,
    },

    /// List known hosts
    Hosts {},

    /// Update the status of a finding
    UpdateStatus {
        /// Instance identifier of the finding, e.g. web01_12345_443_tcp_https
        #[arg(short, long)]
        id: String,

        /// Finding type: ACAS, CKL, WASSP
        #[arg(short = 't', long)]
        finding_type: String,

        /// New status: Ongoing, Completed, NotAFinding, NotApplicable, NotReviewed
        #[arg(short = 'S', long)]
        status: String,
    },

    /// Export all findings to CSV
    Export {
        /// Path to the output CSV file (stdout when omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Wipe every record from the findings store
    Clean {},
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_accepts_several_paths() {
        let cli = Cli::try_parse_from([
            "scanmerge", "import", "-p", "a.nessus", "b.ckl", "-g", "Lab", "--no-software",
        ])
        .unwrap();
        match cli.command {
            Commands::Import { paths, group, no_ports, no_software, .. } => {
                assert_eq!(paths, vec!["a.nessus", "b.ckl"]);
                assert_eq!(group.as_deref(), Some("Lab"));
                assert!(!no_ports);
                assert!(no_software);
            }
            _ => panic!("expected import"),
        }
    }

    #[test]
    fn test_update_status_flags() {
        let cli = Cli::try_parse_from([
            "scanmerge", "update-status", "--id", "web01_SV-1000r3_CKL", "-t", "CKL", "-S", "Completed",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::UpdateStatus { .. }));
    }

    #[test]
    fn test_import_requires_a_path() {
        assert!(Cli::try_parse_from(["scanmerge", "import"]).is_err());
    }
}
