//! Human-readable run summaries

use colored::Colorize;
use converge::{ApplyReport, ResourceOutcome, RunMode};
use std::fmt::Write;

fn symbol(outcome: &ResourceOutcome) -> String {
    match outcome {
        ResourceOutcome::Created => "+".green().bold().to_string(),
        ResourceOutcome::Updated => "~".yellow().bold().to_string(),
        ResourceOutcome::Replaced => "±".yellow().bold().to_string(),
        ResourceOutcome::NoOp => "·".dimmed().to_string(),
        ResourceOutcome::Failed { .. } | ResourceOutcome::DestroyFailed { .. } => {
            "✗".red().bold().to_string()
        }
        ResourceOutcome::Skipped { .. } => "○".yellow().to_string(),
        ResourceOutcome::Destroyed => "-".red().to_string(),
        ResourceOutcome::Retained => "⚓".cyan().to_string(),
    }
}

/// Render a report as a multi-line summary
///
/// With `dry_run` the headline and counters speak of what would happen.
pub fn render(report: &ApplyReport, dry_run: bool) -> String {
    let mut out = String::new();
    let verb = match report.mode {
        RunMode::Apply => "applied",
        RunMode::Destroy => "destroyed",
    };
    let would = if dry_run { "would be " } else { "" };

    let _ = writeln!(out);
    for resource in &report.resources {
        let _ = write!(
            out,
            "  {} {} {} {}",
            symbol(&resource.outcome),
            resource.kind.to_string().dimmed(),
            resource.name.bold(),
            resource.outcome.label()
        );
        if let Some(error) = resource.outcome.error() {
            let _ = write!(out, ": {}", error.red());
        }
        let _ = writeln!(out);
    }

    let summary = report.summary();
    let _ = writeln!(out);
    if dry_run && report.is_success() {
        let _ = writeln!(
            out,
            "  {} Stack '{}' can be {verb}",
            "✓".green().bold(),
            report.stack
        );
    } else if dry_run {
        let _ = writeln!(
            out,
            "  {} Stack '{}' would be {verb} with errors",
            "⚠".yellow().bold(),
            report.stack
        );
    } else if report.is_success() {
        let _ = writeln!(
            out,
            "  {} Stack '{}' {verb} successfully!",
            "✓".green().bold(),
            report.stack
        );
    } else {
        let _ = writeln!(
            out,
            "  {} Stack '{}' {verb} with errors",
            "⚠".yellow().bold(),
            report.stack
        );
    }

    let counters = [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.replaced, "replaced"),
        (summary.destroyed, "destroyed"),
        (summary.retained, "retained"),
        (summary.no_change, "unchanged"),
        (summary.skipped, "skipped"),
    ];
    for (count, label) in counters {
        if count > 0 {
            let _ = writeln!(out, "    • {count} resources {would}{label}");
        }
    }
    if summary.failed > 0 {
        let _ = writeln!(
            out,
            "    • {} {} {would}failed",
            summary.failed,
            "resources".red()
        );
    }

    if dry_run {
        let _ = writeln!(out);
        let _ = writeln!(out, "  {} Dry run - no changes made", "ℹ".blue());
    }
    out
}

/// Print a report to stdout
pub fn print(report: &ApplyReport, dry_run: bool) {
    print!("{}", render(report, dry_run));
}
