// ── Tolerant parsers for diagnostic command output ──
//
// The normal output of ping/arp differs between Linux, BSD, and macOS,
// so everything here is pattern extraction: find the fields we need
// anywhere in the line, ignore the rest of its shape.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use lanpulse_core::DeviceRecord;

/// Matches the ping summary line on both Linux
/// (`rtt min/avg/max/mdev = 19.2/22.1/25.0/2.3 ms`) and BSD/macOS
/// (`round-trip min/avg/max/stddev = ...`). Group 2 is the average.
static PING_AVG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=\s*([0-9]+(?:\.[0-9]+)?)/([0-9]+(?:\.[0-9]+)?)/").unwrap());

/// Four dot-separated 1-3 digit groups.
static IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\b").unwrap());

/// Six colon- or hyphen-separated hex byte pairs. Single hex digits are
/// accepted per group because macOS `arp -a` prints them unpadded.
static MAC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([0-9A-Fa-f]{1,2}(?:[:-][0-9A-Fa-f]{1,2}){5})\b").unwrap()
});

/// Any parenthesized group, for hostname extraction.
static PARENTHESIZED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(([^)]+)\)").unwrap());

/// Extract the average round-trip time from ping's textual report.
///
/// Returns `None` when no summary line is present (interrupted run,
/// unknown format); the caller substitutes the fallback latency.
pub fn ping_average_ms(output: &str) -> Option<f64> {
    let caps = PING_AVG.captures(output)?;
    caps.get(2)?.as_str().parse().ok()
}

/// Extract download/upload/ping figures from `speedtest-cli --json`.
///
/// The utility reports `download` and `upload` in bits per second;
/// both are divided by exactly 1,000,000 to reach Mbps. That divisor is
/// load-bearing for historical comparability -- do not change it
/// without confirming the utility's documented output units.
pub fn speedtest_figures(json_text: &str) -> Option<(f64, f64, f64)> {
    let value: serde_json::Value = serde_json::from_str(json_text).ok()?;
    let download = value.get("download")?.as_f64()?;
    let upload = value.get("upload")?.as_f64()?;
    let ping = value.get("ping")?.as_f64()?;
    Some((download / 1_000_000.0, upload / 1_000_000.0, ping))
}

/// Fold neighbor-table text into a deduplicated device list.
///
/// Per line: an IPv4 address and a MAC address are both required; lines
/// missing either are dropped (never stored as "unknown/unknown"). The
/// hostname is best-effort: a parenthesized token that is not the IP,
/// or the token immediately preceding the parenthesized IP (`arp -a`
/// prints `hostname (ip) at mac ...`, with `?` for unresolved hosts).
/// Duplicate `(ip, mac)` pairs keep the first occurrence.
pub fn neighbor_table(output: &str) -> Vec<DeviceRecord> {
    let observed_at = Utc::now();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut devices = Vec::new();

    for line in output.lines() {
        let Some(ip) = IPV4.find(line).map(|m| m.as_str().to_owned()) else {
            continue;
        };
        let Some(mac) = MAC.find(line).map(|m| m.as_str().to_ascii_lowercase()) else {
            continue;
        };

        if !seen.insert((ip.clone(), mac.clone())) {
            continue;
        }

        devices.push(DeviceRecord {
            hostname: extract_hostname(line, &ip),
            ip_address: ip,
            mac_address: mac,
            observed_at,
        });
    }

    devices
}

fn extract_hostname(line: &str, ip: &str) -> String {
    // A parenthesized group that isn't the IP itself.
    for caps in PARENTHESIZED.captures_iter(line) {
        let inner = caps[1].trim();
        if inner != ip && !inner.is_empty() && IPV4.find(inner).is_none() {
            return inner.to_owned();
        }
    }

    // `arp -a` style: `hostname (ip) at ...`. `?` means unresolved.
    if let Some(pos) = line.find(&format!("({ip})")) {
        let name = line[..pos].trim();
        if !name.is_empty() && name != "?" {
            return name.to_owned();
        }
    }

    String::new()
}
