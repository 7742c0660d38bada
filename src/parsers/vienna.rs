//! ViennaRNA `RNAfold` output parsing.
//!
//! For a FASTA input, RNAfold prints the header, the sequence, and then
//! the MFE structure followed by its energy:
//!
//! ```text
//! >te_query
//! GGGAAAUCCC
//! (((....))) ( -3.40)
//! ```

use super::OutputParser;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnalysisResult, StructurePrediction, ToolInvocation};

const TOOL: &str = "RNAfold";

/// Parses RNAfold stdout for a single input sequence.
pub struct ViennaParser {
    sequence_len: usize,
}

impl ViennaParser {
    /// `sequence` is the folded input, used to check the structure length.
    pub fn new(sequence: &str) -> Self {
        Self {
            sequence_len: normalize_sequence(sequence).len(),
        }
    }
}

impl OutputParser for ViennaParser {
    fn tool(&self) -> &'static str {
        TOOL
    }

    fn parse(&self, invocation: &ToolInvocation) -> PipelineResult<AnalysisResult> {
        parse_rnafold(&invocation.stdout, self.sequence_len).map(AnalysisResult::Structure)
    }
}

/// Strip whitespace and uppercase; RNAfold folds T as U.
pub fn normalize_sequence(sequence: &str) -> String {
    sequence
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Parse the structure line of RNAfold output.
pub fn parse_rnafold(stdout: &str, sequence_len: usize) -> PipelineResult<StructurePrediction> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('>'))
        .last()
        .ok_or_else(|| PipelineError::malformed(TOOL, "no structure line in output"))?;

    let (structure, energy) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| PipelineError::malformed(TOOL, format!("no energy on line '{}'", line)))?;

    if let Some(bad) = structure.chars().find(|c| !matches!(c, '(' | ')' | '.')) {
        return Err(PipelineError::malformed(
            TOOL,
            format!("unexpected character '{}' in structure", bad),
        ));
    }

    if structure.len() != sequence_len {
        return Err(PipelineError::malformed(
            TOOL,
            format!(
                "structure length {} does not match sequence length {}",
                structure.len(),
                sequence_len
            ),
        ));
    }

    let energy_text = energy.trim().trim_start_matches('(').trim_end_matches(')').trim();
    let energy: f64 = energy_text
        .parse()
        .map_err(|_| PipelineError::malformed(TOOL, format!("bad energy '{}'", energy_text)))?;

    Ok(StructurePrediction {
        structure: structure.to_string(),
        energy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rnafold() {
        let stdout = ">te_query\nGGGAAAUCCC\n(((....))) ( -3.40)\n";
        let prediction = parse_rnafold(stdout, 10).unwrap();
        assert_eq!(prediction.structure, "(((....)))");
        assert_eq!(prediction.energy, -3.4);
    }

    #[test]
    fn test_parse_rnafold_compact_energy() {
        let stdout = "GGGGAAAACCCCAUCCUUCGGGGAUUU\n((((....))))(((((....))))). (-13.20)\n";
        let prediction = parse_rnafold(stdout, 27).unwrap();
        assert_eq!(prediction.energy, -13.2);
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let stdout = ">q\nGGGAAAUCCC\n(((...))) ( -3.40)\n";
        let err = parse_rnafold(stdout, 10).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOutput { .. }));
    }

    #[test]
    fn test_bad_alphabet_is_malformed() {
        let stdout = "GGGAAAUCCC\n(((..x.))) ( -3.40)\n";
        assert!(parse_rnafold(stdout, 10).is_err());
    }

    #[test]
    fn test_missing_energy() {
        assert!(parse_rnafold("GGGAAAUCCC\n(((....)))\n", 10).is_err());
        assert!(parse_rnafold("", 10).is_err());
    }

    #[test]
    fn test_parser_uses_normalized_length() {
        let parser = ViennaParser::new("ggg aaa\nucc c");
        let invocation = crate::parsers::test_support::invocation_in(
            std::path::Path::new("."),
            "(((....))) ( -3.40)\n",
        );
        assert!(parser.parse(&invocation).is_ok());
    }
}
