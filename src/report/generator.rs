//! Markdown and JSON report generation.
//!
//! This module renders the finalized batch report. Outcomes appear in
//! universe order, exactly as the aggregator produced them.

use crate::models::{Outcome, Recommendation, Report, ReportMetadata, Signal, Summary};
use anyhow::Result;
use std::collections::BTreeMap;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# StockBatch Report\n\n");

    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(&report.summary));
    output.push_str(&generate_recommendation_section(&report.recommendation_counts()));
    output.push_str(&generate_outcomes_section(&report.outcomes));
    output.push_str(&generate_failures_section(report));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Started:** {}\n",
        metadata.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Strategy:** `{}`\n", metadata.strategy));
    section.push_str(&format!("- **Data Source:** `{}`\n", metadata.source));
    section.push_str(&format!("- **Concurrency:** {}\n", metadata.concurrency));
    section.push_str(&format!("- **Max Attempts:** {}\n", metadata.max_attempts));
    if metadata.cancelled {
        section.push_str("- **Status:** ⚠️ cancelled before completion\n");
    }
    section.push('\n');

    section
}

/// Generate the summary section.
fn generate_summary_section(summary: &Summary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| ✅ Succeeded | ❌ Failed | ⏭️ Skipped | **Total** | Duration |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | **{}** | {:.1}s |\n\n",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.total(),
        summary.total_duration_ms as f64 / 1000.0
    ));

    section
}

/// Generate the Buy / Hold / Sell breakdown.
fn generate_recommendation_section(counts: &BTreeMap<Recommendation, usize>) -> String {
    if counts.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("### Recommendations\n\n");
    section.push_str("| Recommendation | Count |\n");
    section.push_str("|:---|:---:|\n");

    // Strongest first
    for (recommendation, count) in counts.iter().rev() {
        section.push_str(&format!(
            "| {} {} | {} |\n",
            recommendation.emoji(),
            recommendation,
            count
        ));
    }
    section.push('\n');

    section
}

/// Generate the per-code outcome table.
fn generate_outcomes_section(outcomes: &[Outcome]) -> String {
    let mut section = String::new();

    section.push_str("## Results\n\n");

    if outcomes.is_empty() {
        section.push_str("The universe was empty; nothing was analyzed.\n\n");
        return section;
    }

    section.push_str("| Code | Name | Status | Signal | Confidence | Close | Support | Resistance | Trend |\n");
    section.push_str("|:---|:---|:---|:---|:---:|---:|---:|---:|:---|\n");

    for outcome in outcomes {
        section.push_str(&generate_outcome_row(outcome));
    }
    section.push('\n');

    section
}

/// Generate one row of the outcome table.
fn generate_outcome_row(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success { code, signal } => format_signal_row(code.as_str(), signal),
        Outcome::Failure { code, reason, .. } => {
            format!("| {} | | ❌ {} | | | | | | |\n", code, reason)
        }
        Outcome::Skipped { code, reason } => {
            format!("| {} | | ⏭️ {} | | | | | | |\n", code, reason)
        }
    }
}

fn format_signal_row(code: &str, signal: &Signal) -> String {
    let level = |value: Option<f64>| value.map(|v| format!("{:.2}", v)).unwrap_or_default();

    format!(
        "| {} | {} | ✅ | {} {} | {:.0}% | {:.2} | {} | {} | {} |\n",
        code,
        signal.name.as_deref().unwrap_or(""),
        signal.recommendation.emoji(),
        signal.recommendation,
        signal.confidence * 100.0,
        signal.last_close,
        level(signal.support),
        level(signal.resistance),
        signal.trend
    )
}

/// Generate the failures section with per-code reasons.
fn generate_failures_section(report: &Report) -> String {
    let failures: Vec<&Outcome> = report.failures().collect();
    if failures.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Failures\n\n");
    section.push_str("| Code | Reason | Attempts | Detail |\n");
    section.push_str("|:---|:---|:---:|:---|\n");

    for outcome in failures {
        if let Outcome::Failure {
            code,
            reason,
            detail,
            attempts_used,
        } = outcome
        {
            section.push_str(&format!(
                "| {} | `{}` | {} | {} |\n",
                code,
                reason,
                attempts_used,
                detail.replace('|', "\\|")
            ));
        }
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Report generated by StockBatch. Signals are technical readings, not investment advice.*\n");

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
