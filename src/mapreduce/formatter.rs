//! Output formatting for top-K reports

use std::fmt::Write;

use super::report::{Completeness, PartitionStatus, TopKReport};
use super::types::RankedEntry;
use crate::error::Result;

/// Format type for output presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FormatType {
    /// Plain text format
    #[default]
    Text,
    /// JSON format
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Markdown table format
    Markdown,
}

/// Renders a [`TopKReport`] for people or tools
pub struct ReportFormatter {
    format_type: FormatType,
}

impl ReportFormatter {
    pub fn new(format_type: FormatType) -> Self {
        Self { format_type }
    }

    pub fn format(&self, report: &TopKReport) -> Result<String> {
        match self.format_type {
            FormatType::Text => format_text(report),
            FormatType::Json => Ok(serde_json::to_string(report)?),
            FormatType::JsonPretty => Ok(serde_json::to_string_pretty(report)?),
            FormatType::Markdown => format_markdown(report),
        }
    }
}

fn display_name(entry: &RankedEntry) -> String {
    match &entry.attributes {
        Some(attributes) => format!(
            "{} ({}, {})",
            attributes.name, attributes.locality, attributes.region
        ),
        None => "-".to_string(),
    }
}

fn status_label(status: &PartitionStatus) -> String {
    match status {
        PartitionStatus::Completed { entries } => format!("completed ({entries} entries)"),
        PartitionStatus::Failed { error } => format!("failed: {error}"),
        PartitionStatus::TimedOut => "timed out".to_string(),
    }
}

fn format_text(report: &TopKReport) -> Result<String> {
    let mut output = String::new();

    writeln!(
        &mut output,
        ">>> Top {} Paying Customers Across All Partitions",
        report.k
    )?;
    if report.top.is_empty() {
        writeln!(&mut output, "(no data)")?;
    }
    for (index, entry) in report.top.iter().enumerate() {
        writeln!(
            &mut output,
            "{:>3}. {:<40} id={:<8} total={}",
            index + 1,
            display_name(entry),
            entry.entity_key,
            entry.total
        )?;
    }
    writeln!(&mut output)?;

    writeln!(
        &mut output,
        "Partitions: {}/{} completed",
        report.partitions_completed(),
        report.partitions.len()
    )?;
    if let Completeness::Degraded { .. } = &report.completeness {
        for partition in report
            .partitions
            .iter()
            .filter(|p| !p.status.is_completed())
        {
            writeln!(
                &mut output,
                "  ✗ partition {} on {}: {}",
                partition.partition,
                partition.node,
                status_label(&partition.status)
            )?;
        }
        writeln!(&mut output, "WARNING: ranking excludes the partitions above")?;
    }
    if !report.colocation_violations.is_empty() {
        writeln!(
            &mut output,
            "WARNING: {} entity keys span partitions; totals were summed",
            report.colocation_violations.len()
        )?;
    }
    if !report.enrichment_misses.is_empty() {
        writeln!(
            &mut output,
            "Unenriched entries: {}",
            report.enrichment_misses.len()
        )?;
    }
    writeln!(
        &mut output,
        "Run {} finished in {:.2}s",
        report.run_id,
        report.duration.as_secs_f64()
    )?;

    Ok(output)
}

fn format_markdown(report: &TopKReport) -> Result<String> {
    let mut output = String::new();

    writeln!(&mut output, "## Top {} Paying Customers\n", report.k)?;
    writeln!(&mut output, "**Summary:** {}\n", report.summary())?;

    writeln!(&mut output, "| Rank | Customer | Locality | Region | Total |")?;
    writeln!(&mut output, "|------|----------|----------|--------|-------|")?;
    for (index, entry) in report.top.iter().enumerate() {
        let (name, locality, region) = match &entry.attributes {
            Some(a) => (a.name.as_str(), a.locality.as_str(), a.region.as_str()),
            None => ("-", "-", "-"),
        };
        writeln!(
            &mut output,
            "| {} | {} (#{}) | {} | {} | {} |",
            index + 1,
            name,
            entry.entity_key,
            locality,
            region,
            entry.total
        )?;
    }

    writeln!(&mut output, "\n| Partition | Node | Status | Attempts | Duration |")?;
    writeln!(&mut output, "|-----------|------|--------|----------|----------|")?;
    for partition in &report.partitions {
        writeln!(
            &mut output,
            "| {} | {} | {} | {} | {:.3}s |",
            partition.partition,
            partition.node,
            status_label(&partition.status),
            partition.attempts,
            partition.duration.as_secs_f64()
        )?;
    }

    Ok(output)
}
