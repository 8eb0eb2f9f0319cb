use std::sync::LazyLock;

use models::Software;
use regex::Regex;

use crate::normalize::{PLUGIN_LINUX_SOFTWARE, PLUGIN_SOLARIS_SOFTWARE, PLUGIN_WINDOWS_SOFTWARE};

/// Lines of plugin output before the first package line.
const HEADER_LINES: usize = 2;

const WINDOWS_EXCLUSIONS: &[&str] = &["Security Update", "Update for", "Hotfix for", "Language Pack"];

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("valid software regex")
}

static WINDOWS_NAME: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^\s*(.+?)\s*(?:\[version\s|\[installed on\s|$)"));
static WINDOWS_VERSION: LazyLock<Regex> = LazyLock::new(|| pattern(r"\[version\s+([^\]]+)\]"));
static WINDOWS_INSTALL_DATE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\[installed on\s+([^\]]+)\]"));

static DEBIAN_NAME: LazyLock<Regex> = LazyLock::new(|| pattern(r"^ii\s+(\S+)"));
static DEBIAN_VERSION: LazyLock<Regex> = LazyLock::new(|| pattern(r"^ii\s+\S+\s+(\S+)"));

static RPM_NAME: LazyLock<Regex> = LazyLock::new(|| pattern(r"^(.+?)-\d[^-|\s]*-[^|\s]+"));
static RPM_VERSION: LazyLock<Regex> = LazyLock::new(|| pattern(r"^.+?-(\d[^-|\s]*-[^|\s]+)"));

static SOLARIS_NAME: LazyLock<Regex> = LazyLock::new(|| pattern(r"^(\S+)"));
static SOLARIS_VERSION: LazyLock<Regex> = LazyLock::new(|| pattern(r"\(([^()]+)\)\s*$"));

/// Software listed in the output of an enumeration plugin. Other plugins
/// yield nothing.
pub(crate) fn enumerate(plugin_id: &str, output: &str) -> Vec<Software> {
    match plugin_id {
        PLUGIN_WINDOWS_SOFTWARE => windows(output),
        PLUGIN_LINUX_SOFTWARE => {
            if output.contains("Debian") {
                unix(output, &DEBIAN_NAME, &DEBIAN_VERSION, true)
            } else {
                unix(output, &RPM_NAME, &RPM_VERSION, true)
            }
        }
        PLUGIN_SOLARIS_SOFTWARE => unix(output, &SOLARIS_NAME, &SOLARIS_VERSION, false),
        _ => Vec::new(),
    }
}

fn capture(re: &Regex, line: &str) -> String {
    re.captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

fn windows(output: &str) -> Vec<Software> {
    output
        .lines()
        .skip(HEADER_LINES)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let name = capture(&WINDOWS_NAME, line);
            let excluded = name.starts_with('{')
                || name.starts_with("KB")
                || WINDOWS_EXCLUSIONS.iter().any(|x| name.contains(x));
            if name.is_empty() || excluded {
                return None;
            }
            Some(
                Software::new(name, capture(&WINDOWS_VERSION, line))
                    .with_install_date(capture(&WINDOWS_INSTALL_DATE, line)),
            )
        })
        .collect()
}

/// Package lines under the header. Linux output that turns out to describe a
/// Solaris host stops the enumeration at that line.
fn unix(output: &str, name: &Regex, version: &Regex, stop_on_solaris: bool) -> Vec<Software> {
    let mut found = Vec::new();
    for line in output.lines().skip(HEADER_LINES) {
        if stop_on_solaris && line.contains("Solaris") {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let package = capture(name, line);
        if package.is_empty() {
            continue;
        }
        found.push(Software::new(package, capture(version, line)));
    }
    found
}
