//! Scripted tool runner for tests.
//!
//! Each tool name maps to a queue of canned outputs. Outputs are consumed
//! in order and the last one repeats, so "fail once, then succeed" is a
//! two-element script.

use super::{next_invocation_id, ToolRequest, ToolRunner};
use crate::error::{PipelineError, PipelineResult};
use crate::models::ToolInvocation;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// One canned tool response.
#[derive(Debug, Clone, Default)]
pub struct FakeOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Files written into the request's cwd, relative name -> content.
    pub files: Vec<(String, String)>,
    pub delay: Option<Duration>,
}

impl FakeOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    pub fn failing(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stderr: stderr.to_string(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, name: &str, content: &str) -> Self {
        self.files.push((name.to_string(), content.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Default)]
pub struct FakeRunner {
    scripts: Mutex<HashMap<String, Vec<FakeOutput>>>,
    calls: Mutex<Vec<ToolRequest>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a tool. Later calls for the same tool append to its queue.
    pub fn script(self, tool: &str, output: FakeOutput) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default()
            .push(output);
        self
    }

    pub fn calls(&self) -> Vec<ToolRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, tool: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.tool == tool)
            .count()
    }

    fn next_output(&self, tool: &str) -> Option<FakeOutput> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(tool)?;
        if queue.len() > 1 {
            Some(queue.remove(0))
        } else {
            queue.first().cloned()
        }
    }
}

#[async_trait]
impl ToolRunner for FakeRunner {
    async fn invoke(&self, request: ToolRequest) -> PipelineResult<ToolInvocation> {
        self.calls.lock().unwrap().push(request.clone());

        let output = self
            .next_output(&request.tool)
            .ok_or_else(|| PipelineError::ToolExecution {
                tool: request.tool.clone(),
                exit_code: None,
                stderr: format!("Could not execute '{}': not scripted", request.tool),
            })?;

        if let Some(delay) = output.delay {
            match request.timeout {
                Some(limit) if limit < delay => {
                    tokio::time::sleep(limit).await;
                    return Err(PipelineError::ToolTimeout {
                        tool: request.tool.clone(),
                        timeout: limit,
                    });
                }
                _ => tokio::time::sleep(delay).await,
            }
        }

        tokio::fs::create_dir_all(&request.cwd).await?;
        for (name, content) in &output.files {
            tokio::fs::write(request.cwd.join(name), content).await?;
        }

        if output.exit_code != 0 {
            return Err(PipelineError::ToolExecution {
                tool: request.tool.clone(),
                exit_code: Some(output.exit_code),
                stderr: output.stderr,
            });
        }

        Ok(ToolInvocation {
            id: next_invocation_id(),
            tool_name: request.tool,
            arguments: request.args,
            working_directory: request.cwd,
            exit_code: Some(0),
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.delay.map(|d| d.as_millis() as u64).unwrap_or(0),
        })
    }
}
