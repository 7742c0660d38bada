//! Child-process tool runner.

use super::{next_invocation_id, ToolRequest, ToolRunner};
use crate::error::{PipelineError, PipelineResult};
use crate::models::ToolInvocation;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Spawns tools as child processes with an argument vector.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    default_timeout: Duration,
}

impl ProcessRunner {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

/// Resolve a tool the way the runner will: a path if it contains a
/// separator, otherwise the first match on `PATH`.
pub fn locate_executable(tool: &str) -> Option<PathBuf> {
    let candidate = Path::new(tool);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(tool))
        .find(|path| path.is_file())
}

/// Kills the whole process group of a child when dropped, so helper
/// processes a tool forks (RepeatMasker's search workers) die with it.
struct ProcessGroup {
    id: Option<u32>,
}

impl ProcessGroup {
    fn new(id: Option<u32>) -> Self {
        Self { id }
    }

    /// The tool exited on its own; leave the group alone.
    fn release(mut self) {
        self.id = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(id) = self.id.take() {
            debug!("Killing process group {}", id);
            let killed = std::process::Command::new("kill")
                .args(["-KILL", "--", &format!("-{}", id)])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = killed {
                warn!("Failed to kill process group {}: {}", id, e);
            }
        }
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn invoke(&self, request: ToolRequest) -> PipelineResult<ToolInvocation> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        tokio::fs::create_dir_all(&request.cwd).await.map_err(|e| {
            PipelineError::Storage(format!(
                "Failed to create working directory {}: {}",
                request.cwd.display(),
                e
            ))
        })?;

        debug!(
            "Running {} {:?} in {}",
            request.tool,
            request.args,
            request.cwd.display()
        );

        let started = Instant::now();

        let mut command = Command::new(&request.tool);
        command
            .args(&request.args)
            .current_dir(&request.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| PipelineError::ToolExecution {
            tool: request.tool.clone(),
            exit_code: None,
            stderr: format!("Could not execute '{}': {}", request.tool, e),
        })?;

        // A timed-out or cancelled invocation drops both the child and the group.
        let group = ProcessGroup::new(child.id());

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                group.release();
                output
            }
            Ok(Err(e)) => {
                return Err(PipelineError::ToolExecution {
                    tool: request.tool.clone(),
                    exit_code: None,
                    stderr: format!("Failed waiting for '{}': {}", request.tool, e),
                })
            }
            Err(_) => {
                warn!("{} exceeded {:?}, killed", request.tool, timeout);
                return Err(PipelineError::ToolTimeout {
                    tool: request.tool.clone(),
                    timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let detail = if !stderr.trim().is_empty() {
                stderr
            } else if !stdout.trim().is_empty() {
                stdout
            } else {
                format!("exit status {}", output.status)
            };
            return Err(PipelineError::ToolExecution {
                tool: request.tool.clone(),
                exit_code: output.status.code(),
                stderr: detail,
            });
        }

        Ok(ToolInvocation {
            id: next_invocation_id(),
            tool_name: request.tool,
            arguments: request.args,
            working_directory: request.cwd,
            exit_code: output.status.code(),
            stdout,
            stderr,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Duration::from_secs(10))
    }

    #[test]
    fn test_locate_executable() {
        assert!(locate_executable("sh").is_some());
        assert!(locate_executable("/bin/sh").is_some());
        assert!(locate_executable("definitely-not-a-real-tool-xyz").is_none());
        assert!(locate_executable("/nonexistent/bin/tool").is_none());
    }

    #[tokio::test]
    async fn test_shell_metacharacters_are_not_interpreted() {
        let temp_dir = TempDir::new().unwrap();
        let payload = "; touch pwned; echo $(id)";

        let invocation = runner()
            .invoke(ToolRequest::new("echo", temp_dir.path()).arg(payload))
            .await
            .unwrap();

        assert_eq!(invocation.stdout.trim_end(), payload);
        assert!(!temp_dir.path().join("pwned").exists());
        assert_eq!(invocation.exit_code, Some(0));
        assert_eq!(invocation.arguments, vec![payload.to_string()]);
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let temp_dir = TempDir::new().unwrap();
        let started = Instant::now();

        let err = runner()
            .invoke(
                ToolRequest::new("sleep", temp_dir.path())
                    .arg("30")
                    .timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ToolTimeout { .. }));
        assert_eq!(err.to_string(), "sleep timed out after 200ms");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        std::fs::read_to_string(format!("/proc/{}/stat", pid))
            .map(|stat| {
                let state = stat.rsplit(')').next().unwrap_or("").trim_start();
                !state.starts_with('Z')
            })
            .unwrap_or(false)
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_forked_workers() {
        let temp_dir = TempDir::new().unwrap();

        let err = runner()
            .invoke(
                ToolRequest::new("sh", temp_dir.path())
                    .args(["-c", "sleep 30 & echo $! > worker.pid; wait"])
                    .timeout(Duration::from_millis(500)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolTimeout { .. }));

        let pid = std::fs::read_to_string(temp_dir.path().join("worker.pid")).unwrap();
        let pid = pid.trim();

        let mut alive = true;
        for _ in 0..40 {
            alive = is_running(pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "worker {} outlived the timeout", pid);
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let temp_dir = TempDir::new().unwrap();

        let err = runner()
            .invoke(ToolRequest::new("ls", temp_dir.path()).arg("definitely-not-here"))
            .await
            .unwrap_err();

        match err {
            PipelineError::ToolExecution {
                exit_code, stderr, ..
            } => {
                assert_ne!(exit_code, Some(0));
                assert!(stderr.contains("definitely-not-here"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let temp_dir = TempDir::new().unwrap();

        let err = runner()
            .invoke(ToolRequest::new("no-such-tool-xyz", temp_dir.path()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::ToolExecution { exit_code: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_writes_into_cwd() {
        let temp_dir = TempDir::new().unwrap();
        let cwd = temp_dir.path().join("stage");

        runner()
            .invoke(ToolRequest::new("touch", &cwd).arg("out.txt"))
            .await
            .unwrap();

        assert!(cwd.join("out.txt").exists());
    }
}
