//! Salmon quantification and DESeq2 result parsing.

use super::{header_columns, read_output, OutputParser};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnalysisResult, ExpressionResult, ToolInvocation};

const SALMON: &str = "salmon";
const DESEQ2: &str = "DESeq2";

/// File Salmon writes into its `-o` directory.
pub const QUANT_FILE: &str = "quant.sf";

/// File the DESeq2 wrapper script is told to write.
pub const DESEQ2_FILE: &str = "deseq2_results.csv";

const SALMON_COLUMNS: &[&str] = &["Name", "TPM", "NumReads"];

/// Parses `quant.sf` from a `salmon quant` run.
pub struct SalmonParser;

impl OutputParser for SalmonParser {
    fn tool(&self) -> &'static str {
        SALMON
    }

    fn parse(&self, invocation: &ToolInvocation) -> PipelineResult<AnalysisResult> {
        let text = read_output(invocation, QUANT_FILE, SALMON)?;
        let transcripts = count_quantified(&text)?;

        Ok(AnalysisResult::Expression(ExpressionResult {
            quantified: true,
            differential_gene_count: 0,
            transcripts,
        }))
    }
}

/// Validate a `quant.sf` table and count its transcripts.
pub fn count_quantified(text: &str) -> PipelineResult<usize> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| PipelineError::malformed(SALMON, "empty quant.sf"))?;
    let columns = header_columns(header, '\t');

    let mut indices = Vec::with_capacity(SALMON_COLUMNS.len());
    for wanted in SALMON_COLUMNS {
        let index = columns
            .iter()
            .position(|c| c == wanted)
            .ok_or_else(|| PipelineError::malformed(SALMON, format!("missing column {}", wanted)))?;
        indices.push(index);
    }

    let mut transcripts = 0;
    for (row, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != columns.len() {
            return Err(PipelineError::malformed(
                SALMON,
                format!("row {} has {} fields, expected {}", row + 1, fields.len(), columns.len()),
            ));
        }
        for &index in &indices[1..] {
            if fields[index].trim().parse::<f64>().is_err() {
                return Err(PipelineError::malformed(
                    SALMON,
                    format!("row {}: non-numeric value '{}'", row + 1, fields[index]),
                ));
            }
        }
        transcripts += 1;
    }

    Ok(transcripts)
}

/// Parses the DESeq2 results table written by the R wrapper.
pub struct Deseq2Parser {
    alpha: f64,
}

impl Deseq2Parser {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }
}

impl OutputParser for Deseq2Parser {
    fn tool(&self) -> &'static str {
        DESEQ2
    }

    fn parse(&self, invocation: &ToolInvocation) -> PipelineResult<AnalysisResult> {
        let text = read_output(invocation, DESEQ2_FILE, DESEQ2)?;
        let differential = count_differential(&text, self.alpha)?;

        Ok(AnalysisResult::Expression(ExpressionResult {
            quantified: true,
            differential_gene_count: differential,
            transcripts: 0,
        }))
    }
}

/// Count genes with `padj < alpha`. `NA` rows are ignored.
pub fn count_differential(text: &str, alpha: f64) -> PipelineResult<usize> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| PipelineError::malformed(DESEQ2, "empty results table"))?;
    let columns = header_columns(header, ',');
    let padj = columns
        .iter()
        .position(|c| c == "padj")
        .ok_or_else(|| PipelineError::malformed(DESEQ2, "missing column padj"))?;

    let mut count = 0;
    for (row, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split(',').collect();
        let value = fields
            .get(padj)
            .map(|v| v.trim().trim_matches('"'))
            .ok_or_else(|| PipelineError::malformed(DESEQ2, format!("row {} is short", row + 1)))?;

        if value == "NA" || value.is_empty() {
            continue;
        }

        let padj: f64 = value.parse().map_err(|_| {
            PipelineError::malformed(DESEQ2, format!("row {}: bad padj '{}'", row + 1, value))
        })?;

        if padj < alpha {
            count += 1;
        }
    }

    Ok(count)
}
