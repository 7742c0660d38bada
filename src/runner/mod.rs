//! Running external tools.
//!
//! The orchestrator talks to tools only through the [`ToolRunner`] trait,
//! so tests can swap the real [`ProcessRunner`] for a scripted fake.

#[cfg(test)]
pub mod fake;
pub mod process;

pub use process::{locate_executable, ProcessRunner};

use crate::error::PipelineResult;
use crate::models::ToolInvocation;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_INVOCATION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique invocation id.
pub fn next_invocation_id() -> u64 {
    NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed)
}

/// A request to run one executable.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    /// Executable name or path.
    pub tool: String,
    /// Argument vector. Passed to the process as-is, never through a shell.
    pub args: Vec<String>,
    /// Working directory, owned by this invocation.
    pub cwd: PathBuf,
    /// Overrides the runner's default timeout.
    pub timeout: Option<Duration>,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Runs one external tool to completion.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run the tool. Fails with `ToolTimeout` or `ToolExecution`.
    async fn invoke(&self, request: ToolRequest) -> PipelineResult<ToolInvocation>;
}
