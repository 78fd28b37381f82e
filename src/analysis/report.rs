//! Human-readable formatting of case results.

use colored::Colorize;

use crate::matrix::{ProbeKind, TestCase};

/// Format a throughput in bits per second with a readable unit.
pub fn format_rate(bps: f64) -> String {
    if bps >= 1e9 {
        format!("{:.2} Gbps", bps / 1e9)
    } else if bps >= 1e6 {
        format!("{:.1} Mbps", bps / 1e6)
    } else if bps >= 1e3 {
        format!("{:.1} Kbps", bps / 1e3)
    } else {
        format!("{bps:.0} bps")
    }
}

/// `ID - n: kind from AZ/source to AZ/destination`, shared by every result line.
pub fn describe(case: &TestCase) -> String {
    let mut line = format!(
        "ID - {:3}: {} from {}/{} to {}/{}",
        case.id,
        case.kind,
        case.from_az.as_str().yellow(),
        case.from,
        case.to_az.as_str().yellow(),
        case.to
    );
    if case.kind == ProbeKind::Bandwidth {
        if let Some(bps) = case.bandwidth {
            line.push_str(&format!(", sender bandwidth: {}", format_rate(bps)));
        }
    }
    line
}
