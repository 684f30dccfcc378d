//! Report records and emission
//!
//! At teardown each middleware section walks its recorders in discovery
//! order and keeps only the ones that observed at least one call.

use serde::{Deserialize, Serialize};

use crate::recorder::Reportable;
use crate::timing::TimingSummary;

/// Output record for one instrumented routine
///
/// Field names and order are part of the output format. `Call Count` is a
/// string on purpose, and `Topics` only appears for topic-capturing recorders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    #[serde(rename = "Method")]
    pub method: String,
    #[serde(rename = "Object")]
    pub object: String,
    #[serde(rename = "Call Count")]
    pub call_count: String,
    #[serde(rename = "Topics", default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
}

/// All records produced by one middleware analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    #[serde(rename = "Middleware")]
    pub middleware: String,
    #[serde(rename = "Records")]
    pub records: Vec<RecordEntry>,
}

/// Collect the records of every recorder that has something to say
///
/// Returns `None` when no recorder observed a call, so the section is left
/// out of the report altogether.
pub fn emit_section<'a, R, I>(middleware: &str, recorders: I) -> Option<ReportSection>
where
    R: Reportable + 'a,
    I: IntoIterator<Item = &'a R>,
{
    let records: Vec<RecordEntry> = recorders
        .into_iter()
        .filter(|r| r.has_info())
        .filter_map(|r| r.to_record())
        .collect();

    if records.is_empty() {
        return None;
    }

    Some(ReportSection {
        middleware: middleware.to_string(),
        records,
    })
}

/// Root report structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub version: String,
    pub format: String,
    pub sections: Vec<ReportSection>,
    /// Time the probe spent inside recorder updates (if enabled)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overhead: Option<TimingSummary>,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "ddsprobe-json-v1".to_string(),
            sections: Vec::new(),
            overhead: None,
        }
    }

    pub fn add_section(&mut self, section: ReportSection) {
        self.sections.push(section);
    }

    pub fn set_overhead(&mut self, summary: TimingSummary) {
        self.overhead = Some(summary);
    }

    pub fn section(&self, middleware: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.middleware == middleware)
    }

    /// Total number of records across sections
    pub fn record_count(&self) -> usize {
        self.sections.iter().map(|s| s.records.len()).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Print a human-readable summary table to stderr
pub fn print_summary(report: &Report) {
    if report.record_count() == 0 {
        eprintln!("\nNo DDS calls observed.");
        return;
    }

    for section in &report.sections {
        eprintln!("\n=== {} ===", section.middleware);
        eprintln!("{:>10}  {:<50}  Method", "Calls", "Object");
        eprintln!("{}", "─".repeat(96));
        for record in &section.records {
            eprintln!("{:>10}  {:<50}  {}", record.call_count, record.object, record.method);
            if let Some(topics) = &record.topics {
                eprintln!("{:>10}  topics: {}", "", topics.join(", "));
            }
        }
    }

    if let Some(overhead) = &report.overhead {
        eprintln!("{}", "─".repeat(96));
        eprintln!(
            "Probe overhead: {} samples, {:.6} ms total, {:.6} ms mean",
            overhead.samples, overhead.total_ms, overhead.mean_ms
        );
    }
}
