//! Stage outcome aggregation.
//!
//! Turns the per-stage outcomes of a pipeline run into a [`Report`].
//! Every submitted stage appears in the report, in submission order,
//! whether it succeeded or not.

use crate::error::PipelineResult;
use crate::models::{AnalysisResult, StageRecord};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Every stage succeeded.
    Success,
    /// At least one stage succeeded and at least one failed.
    Partial,
    /// Nothing succeeded.
    Error,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportStatus::Success => write!(f, "success"),
            ReportStatus::Partial => write!(f, "partial"),
            ReportStatus::Error => write!(f, "error"),
        }
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Failed,
}

/// One stage in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error variant name, e.g. `tool_timeout`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Tool that produced the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl StageEntry {
    fn from_outcome(outcome: PipelineResult<StageRecord>) -> Self {
        match outcome {
            Ok(record) => {
                let invocation = record.invocation;
                let output_dir = (!invocation.is_builtin()).then_some(invocation.working_directory);
                Self {
                    status: StageStatus::Success,
                    result: Some(record.result),
                    error: None,
                    error_kind: None,
                    tool: Some(invocation.tool_name),
                    duration_ms: Some(invocation.duration_ms),
                    output_dir,
                }
            }
            Err(e) => Self {
                status: StageStatus::Failed,
                result: None,
                error: Some(e.to_string()),
                error_kind: Some(e.kind().to_string()),
                tool: None,
                duration_ms: None,
                output_dir: None,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }
}

/// Stage counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Aggregated result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub status: ReportStatus,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    /// Stage name -> entry, in submission order.
    pub stages: IndexMap<String, StageEntry>,
}

impl Report {
    /// Error messages of failed stages, keyed by stage name.
    pub fn errors(&self) -> IndexMap<String, String> {
        self.stages
            .iter()
            .filter_map(|(name, entry)| entry.error.clone().map(|e| (name.clone(), e)))
            .collect()
    }
}

/// Overall status from stage counts. An empty run counts as success.
pub fn overall_status(succeeded: usize, failed: usize) -> ReportStatus {
    match (succeeded, failed) {
        (_, 0) => ReportStatus::Success,
        (0, _) => ReportStatus::Error,
        _ => ReportStatus::Partial,
    }
}

/// Name not yet used in `stages`. Repeats get `#2`, `#3`, ...
fn unique_name(stages: &IndexMap<String, StageEntry>, name: String) -> String {
    if !stages.contains_key(&name) {
        return name;
    }
    (2..)
        .map(|n| format!("{}#{}", name, n))
        .find(|candidate| !stages.contains_key(candidate))
        .unwrap_or(name)
}

/// Merge stage outcomes into a report.
pub fn aggregate<I>(outcomes: I) -> Report
where
    I: IntoIterator<Item = (String, PipelineResult<StageRecord>)>,
{
    let mut stages: IndexMap<String, StageEntry> = IndexMap::new();
    let mut summary = ReportSummary::default();

    for (name, outcome) in outcomes {
        let entry = StageEntry::from_outcome(outcome);
        if entry.is_success() {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }
        summary.total += 1;

        let name = unique_name(&stages, name);
        stages.insert(name, entry);
    }

    Report {
        status: overall_status(summary.succeeded, summary.failed),
        generated_at: Utc::now(),
        summary,
        stages,
    }
}

/// Count failed stages by error kind.
pub fn failures_by_kind(report: &Report) -> IndexMap<String, usize> {
    let mut counts: IndexMap<String, usize> = IndexMap::new();

    for entry in report.stages.values() {
        if let Some(kind) = &entry.error_kind {
            *counts.entry(kind.clone()).or_default() += 1;
        }
    }

    counts
}

/// Generate a one-line text summary of a report.
pub fn generate_summary_text(report: &Report) -> String {
    let mut text = format!(
        "{}: {}/{} stages succeeded",
        report.status, report.summary.succeeded, report.summary.total
    );

    let failed: Vec<&str> = report
        .stages
        .iter()
        .filter(|(_, entry)| !entry.is_success())
        .map(|(name, _)| name.as_str())
        .collect();

    if !failed.is_empty() {
        text.push_str(&format!(" (failed: {})", failed.join(", ")));
    }

    text
}
