//! GO enrichment table parsing.
//!
//! Reads the tab-separated table written by the enrichment tool
//! (goatools `find_enrichment.py --outfile`), keeps the term and the most
//! conservative p-value column present, and sorts by ascending p-value.

use super::{header_columns, read_output, OutputParser};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnalysisResult, GoTerm, ToolInvocation};
use std::cmp::Ordering;

const TOOL: &str = "GO enrichment";

/// File the enrichment tool is told to write.
pub const GO_FILE: &str = "go_results.tsv";

const TERM_COLUMNS: &[&str] = &["GO", "term", "ID"];

/// Preferred p-value columns, most corrected first.
const PVALUE_COLUMNS: &[&str] = &["p_fdr_bh", "p_bonferroni", "p_uncorrected", "pvalue"];

pub struct GoEnrichmentParser;

impl OutputParser for GoEnrichmentParser {
    fn tool(&self) -> &'static str {
        TOOL
    }

    fn parse(&self, invocation: &ToolInvocation) -> PipelineResult<AnalysisResult> {
        let text = read_output(invocation, GO_FILE, TOOL)?;
        parse_go_table(&text).map(AnalysisResult::GoEnrichment)
    }
}

fn find_column(columns: &[String], candidates: &[&str]) -> Option<usize> {
    candidates
        .iter()
        .find_map(|wanted| columns.iter().position(|c| c == wanted))
}

/// Parse term/p-value rows, sorted ascending by p-value then term.
pub fn parse_go_table(text: &str) -> PipelineResult<Vec<GoTerm>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| PipelineError::malformed(TOOL, "empty results table"))?;
    let columns = header_columns(header, '\t');

    let term_index = find_column(&columns, TERM_COLUMNS)
        .ok_or_else(|| PipelineError::malformed(TOOL, "missing GO term column"))?;
    let pvalue_index = find_column(&columns, PVALUE_COLUMNS)
        .ok_or_else(|| PipelineError::malformed(TOOL, "missing p-value column"))?;

    let mut terms = Vec::new();
    for (row, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split('\t').collect();
        let (Some(term), Some(pvalue)) = (fields.get(term_index), fields.get(pvalue_index)) else {
            return Err(PipelineError::malformed(TOOL, format!("row {} is short", row + 1)));
        };

        let pvalue: f64 = pvalue.trim().parse().map_err(|_| {
            PipelineError::malformed(TOOL, format!("row {}: bad p-value '{}'", row + 1, pvalue))
        })?;

        if !(0.0..=1.0).contains(&pvalue) {
            return Err(PipelineError::malformed(
                TOOL,
                format!("row {}: p-value {} outside [0, 1]", row + 1, pvalue),
            ));
        }

        terms.push(GoTerm {
            term: term.trim().to_string(),
            pvalue,
        });
    }

    sort_by_pvalue(&mut terms);
    Ok(terms)
}

/// Ascending p-value; equal p-values fall back to term order.
pub fn sort_by_pvalue(terms: &mut [GoTerm]) {
    terms.sort_by(|a, b| {
        a.pvalue
            .partial_cmp(&b.pvalue)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.term.cmp(&b.term))
    });
}
