//! Parsers turning raw tool output into typed results.
//!
//! Each external tool has one [`OutputParser`]. Parsers read the
//! invocation's stdout or the files the tool left in its working
//! directory, and fail with `MalformedOutput` when the format is off.

pub mod expression;
pub mod go;
pub mod mapping;
pub mod repeatmasker;
pub mod vienna;

pub use expression::{Deseq2Parser, SalmonParser};
pub use go::GoEnrichmentParser;
pub use repeatmasker::RepeatMaskerParser;
pub use vienna::ViennaParser;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnalysisResult, ToolInvocation};

/// Converts one tool's output into an [`AnalysisResult`].
pub trait OutputParser: Send + Sync {
    /// Tool name used in error messages.
    fn tool(&self) -> &'static str;

    fn parse(&self, invocation: &ToolInvocation) -> PipelineResult<AnalysisResult>;
}

/// Read a file the tool wrote into its working directory.
pub(crate) fn read_output(
    invocation: &ToolInvocation,
    name: &str,
    tool: &str,
) -> PipelineResult<String> {
    let path = invocation.working_directory.join(name);
    std::fs::read_to_string(&path).map_err(|e| {
        PipelineError::malformed(
            tool,
            format!("expected output {} not readable: {}", path.display(), e),
        )
    })
}

/// Split a delimited header into column names, dropping quotes and `#`.
pub(crate) fn header_columns(line: &str, delimiter: char) -> Vec<String> {
    line.trim_start_matches('#')
        .split(delimiter)
        .map(|c| c.trim().trim_matches('"').to_string())
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::ToolInvocation;
    use std::path::Path;

    pub fn invocation_in(dir: &Path, stdout: &str) -> ToolInvocation {
        ToolInvocation {
            id: 0,
            tool_name: "test".to_string(),
            arguments: Vec::new(),
            working_directory: dir.to_path_buf(),
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_columns() {
        assert_eq!(
            header_columns("\"\",\"baseMean\",\"padj\"", ','),
            vec!["", "baseMean", "padj"]
        );
        assert_eq!(
            header_columns("# GO\tNS\tp_uncorrected", '\t'),
            vec!["GO", "NS", "p_uncorrected"]
        );
    }
}
