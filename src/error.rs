//! Error taxonomy for the analysis pipeline.
//!
//! Every failure that can reach the HTTP boundary is a [`PipelineError`].
//! Startup code uses `anyhow` instead.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the artifact store, tool runner, parsers and orchestrator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{tool} timed out after {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("{tool} failed (exit code {exit_code:?}): {stderr}")]
    ToolExecution {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Malformed {tool} output: {message}")]
    MalformedOutput { tool: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Stage skipped: upstream stage '{0}' failed")]
    DependencyFailed(String),
}

impl PipelineError {
    pub fn malformed(tool: &str, message: impl Into<String>) -> Self {
        PipelineError::MalformedOutput {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidRole(_) => "invalid_role",
            PipelineError::Storage(_) => "storage",
            PipelineError::ToolTimeout { .. } => "tool_timeout",
            PipelineError::ToolExecution { .. } => "tool_execution",
            PipelineError::MalformedOutput { .. } => "malformed_output",
            PipelineError::InvalidInput(_) => "invalid_input",
            PipelineError::DependencyFailed(_) => "dependency_failed",
        }
    }

    /// Whether the orchestrator's retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::ToolTimeout { .. } | PipelineError::ToolExecution { .. }
        )
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::InvalidRole(_) | PipelineError::InvalidInput(_) => 400,
            PipelineError::ToolExecution { .. }
            | PipelineError::MalformedOutput { .. }
            | PipelineError::DependencyFailed(_) => 502,
            PipelineError::ToolTimeout { .. } => 504,
            PipelineError::Storage(_) => 500,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
