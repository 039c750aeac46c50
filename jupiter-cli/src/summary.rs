use std::fmt::Write;

use indicatif::HumanBytes;
use jupiter_engine::{AssetOutcome, AssetReport, RunStatistics};

fn section<'a>(out: &mut String, title: &str, reports: impl Iterator<Item = &'a AssetReport>) {
    let mut reports = reports.peekable();
    if reports.peek().is_none() {
        return;
    }
    let _ = writeln!(out, "{title}:");
    for report in reports {
        match &report.outcome {
            AssetOutcome::Failed { category } => {
                let _ = writeln!(out, "  - {}: {category}", report.label);
            }
            _ => {
                let _ = writeln!(out, "  - {}", report.label);
            }
        }
    }
}

/// Human-readable end-of-run report.
pub fn render(stats: &RunStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "==================================================");
    let _ = writeln!(
        out,
        "Processed: {}  Downloaded: {} ({})  Skipped: {} cached, {} DRM  Failed: {}",
        stats.attempted,
        stats.succeeded,
        HumanBytes(stats.bytes_downloaded),
        stats.skipped_cached,
        stats.skipped_protected,
        stats.failed,
    );
    let _ = writeln!(out, "==================================================");

    section(&mut out, "Downloaded", stats.completed());
    section(&mut out, "DRM protected", stats.protected());
    section(&mut out, "Failed", stats.failures());
    out
}
