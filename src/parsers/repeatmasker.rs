//! RepeatMasker output parsing.
//!
//! RepeatMasker writes `<genome>.out` (one row per repeat hit) and
//! `<genome>.tbl` (summary table) into its `-dir`. The `.out` rows give us
//! the TE count and classes; the `.tbl` gives the masked percentage.

use super::{read_output, OutputParser};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnalysisResult, TeSummary, ToolInvocation};
use std::collections::BTreeSet;

const TOOL: &str = "RepeatMasker";

/// Minimum whitespace-separated columns in a `.out` data row.
const OUT_COLUMNS: usize = 15;

/// Index of the `class/family` column.
const CLASS_COLUMN: usize = 10;

/// Repeat classes counted as transposable elements. Simple repeats,
/// low complexity, satellites and RNA genes are masked but not TEs.
const TE_CLASSES: &[&str] = &["LINE", "SINE", "LTR", "DNA", "RC", "Retroposon"];

const NO_REPEATS_MARKER: &str = "There were no repetitive sequences detected";

/// Parser for one RepeatMasker run over `genome_name`.
pub struct RepeatMaskerParser {
    genome_name: String,
}

impl RepeatMaskerParser {
    /// `genome_name` is the file name of the masked FASTA, no directory.
    pub fn new(genome_name: impl Into<String>) -> Self {
        Self {
            genome_name: genome_name.into(),
        }
    }
}

impl OutputParser for RepeatMaskerParser {
    fn tool(&self) -> &'static str {
        TOOL
    }

    fn parse(&self, invocation: &ToolInvocation) -> PipelineResult<AnalysisResult> {
        let out = read_output(invocation, &format!("{}.out", self.genome_name), TOOL)?;
        let (total_tes, te_families) = parse_out(&out)?;

        let coverage = if total_tes == 0 && out.contains(NO_REPEATS_MARKER) {
            0.0
        } else {
            let tbl = read_output(invocation, &format!("{}.tbl", self.genome_name), TOOL)?;
            parse_tbl_coverage(&tbl)?
        };

        Ok(AnalysisResult::TeSummary(TeSummary {
            total_tes,
            te_families,
            coverage,
        }))
    }
}

/// Count TE hits and collect their classes from a `.out` file.
pub fn parse_out(text: &str) -> PipelineResult<(usize, BTreeSet<String>)> {
    if text.contains(NO_REPEATS_MARKER) {
        return Ok((0, BTreeSet::new()));
    }

    let mut saw_header = false;
    let mut total = 0usize;
    let mut families = BTreeSet::new();

    for (line_no, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = fields.first() else {
            continue;
        };

        if *first == "SW" || *first == "score" {
            saw_header = true;
            continue;
        }

        if first.parse::<f64>().is_err() {
            return Err(PipelineError::malformed(
                TOOL,
                format!("line {}: unexpected content '{}'", line_no + 1, line.trim()),
            ));
        }

        if !saw_header {
            return Err(PipelineError::malformed(TOOL, "missing .out header"));
        }

        if fields.len() < OUT_COLUMNS {
            return Err(PipelineError::malformed(
                TOOL,
                format!(
                    "line {}: expected at least {} columns, found {}",
                    line_no + 1,
                    OUT_COLUMNS,
                    fields.len()
                ),
            ));
        }

        let class = repeat_class(fields[CLASS_COLUMN]);
        if TE_CLASSES.contains(&class.as_str()) {
            total += 1;
            families.insert(class);
        }
    }

    if !saw_header {
        return Err(PipelineError::malformed(TOOL, "missing .out header"));
    }

    Ok((total, families))
}

/// `LINE/L1` -> `LINE`, `DNA?/hAT?` -> `DNA`.
fn repeat_class(class_family: &str) -> String {
    class_family
        .split('/')
        .next()
        .unwrap_or(class_family)
        .trim_end_matches('?')
        .to_string()
}

/// Extract the masked percentage from a `.tbl` summary.
pub fn parse_tbl_coverage(text: &str) -> PipelineResult<f64> {
    let line = text
        .lines()
        .find(|l| l.trim_start().starts_with("bases masked:"))
        .ok_or_else(|| PipelineError::malformed(TOOL, "no 'bases masked' line in .tbl"))?;

    let percent = line
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once('%'))
        .map(|(value, _)| value.trim())
        .ok_or_else(|| PipelineError::malformed(TOOL, format!("bad coverage line: {}", line)))?;

    let coverage: f64 = percent
        .parse()
        .map_err(|_| PipelineError::malformed(TOOL, format!("bad coverage value: {}", percent)))?;

    if !(0.0..=100.0).contains(&coverage) {
        return Err(PipelineError::malformed(
            TOOL,
            format!("coverage {} outside 0-100", coverage),
        ));
    }

    Ok(coverage)
}
