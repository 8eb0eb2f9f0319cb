use std::fs::File;
use std::io;
use std::path::Path;
use std::process;

#[macro_use]
mod log;

use cli::{parse_args, Commands};
use ingest::{ReadOutcome, Settings};
use models::{FindingType, ScannedFile, Status};
use storage::{DataDir, FindingFilter};

fn main() {
    log::init();
    if let Err(e) = run() {
        failure!("{e}");
        process::exit(1);
    }
}

fn run() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    // ---- Checklist pre-scan needs no findings store -------------------
    if let Commands::Identifiers { path } = &args.command {
        return check_identifiers(Path::new(path));
    }

    let data = DataDir::init()?;

    match args.command {
        Commands::Identifiers { .. } => unreachable!(),

        Commands::Import { paths, group, no_ports, no_references, no_software } => {
            let mut settings = Settings::from_env();
            settings.capture_acas_ports &= !no_ports;
            settings.capture_acas_references &= !no_references;
            settings.capture_acas_software &= !no_software;

            tracing::debug!(files = paths.len(), ?settings, "starting import");
            let mut db = data.open_db()?;
            let mut failed = 0usize;
            for path in &paths {
                let file = ScannedFile::new(path, group.as_deref());
                let outcome = ingest::read_file(&mut db, &file, &settings);
                if outcome == ReadOutcome::Processed {
                    success!("{}: {}", file.file_name, outcome);
                } else {
                    failed += 1;
                    failure!("{}: {}", file.file_name, outcome);
                }
            }

            if failed > 0 {
                return Err(format!("{failed} of {} file(s) failed to import", paths.len()).into());
            }
        }

        Commands::Findings { host, finding_type, status } => {
            let filter = FindingFilter {
                host,
                finding_type: finding_type.map(|t| t.parse::<FindingType>()).transpose()?,
                status: status.map(|s| s.parse::<Status>()).transpose()?,
            };
            let db = data.open_db()?;
            let findings = db.findings(&filter)?;
            if findings.is_empty() {
                info!("No findings match the given filters");
            }
            for f in &findings {
                info!(
                    "{} [{}] {} ({}) {}{}",
                    f.instance_identifier,
                    f.raw_risk,
                    f.status,
                    f.host_name,
                    f.title,
                    if f.delta_analysis_required { " (delta analysis required)" } else { "" },
                );
            }

            let totals: Vec<String> = db
                .status_counts()?
                .iter()
                .map(|(status, count)| format!("{status}: {count}"))
                .collect();
            if !totals.is_empty() {
                info!("Store totals: {}", totals.join(", "));
            }
        }

        Commands::Hosts {} => {
            let db = data.open_db()?;
            for host in db.hosts()? {
                let credentialed = match host.credentialed_scan {
                    Some(true) => "credentialed",
                    Some(false) => "uncredentialed",
                    None => "n/a",
                };
                info!(
                    "{} [{}] {} ({})",
                    host.displayed_host_name,
                    if host.scan_ip.is_empty() { "-" } else { host.scan_ip.as_str() },
                    host.operating_system,
                    credentialed,
                );
            }
        }

        Commands::UpdateStatus { id, finding_type, status } => {
            let finding_type: FindingType = finding_type.parse()?;
            let status: Status = status.parse()?;
            let db = data.open_db()?;
            db.update_status(&id, finding_type, status)?;
            success!("{} ({}) → {}", id, finding_type, status);
        }

        Commands::Export { output } => {
            let db = data.open_db()?;
            match output {
                Some(path) => {
                    let rows = db.export_csv(File::create(&path)?)?;
                    success!("Exported {} finding(s) to {}", rows, path);
                }
                None => {
                    db.export_csv(io::stdout().lock())?;
                }
            }
        }

        Commands::Clean {} => {
            let db = data.open_db()?;
            let removed = db.clean()?;
            success!("Findings store wiped clean ({} finding(s) removed)", removed);
        }
    }

    Ok(())
}

/// Report the host identifiers of a checklist and whether they satisfy the
/// configured requirements.
fn check_identifiers(path: &Path) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env();
    let ids = ingest::scan_identifiers(path)?;
    info!("host name: {}", ids.host_name);
    info!("ip address: {}", ids.ip_address);
    info!("mac address: {}", ids.mac_address);

    if ingest::obtain_identifiers(path, &settings) {
        success!("{} provides the required identifiers", path.display());
        Ok(())
    } else {
        Err(format!("{} is missing required identifiers", path.display()).into())
    }
}
