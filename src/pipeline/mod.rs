//! Pipeline orchestration.
//!
//! A [`Stage`] is one tool invocation plus the parser for its output, or a
//! computation done in-process. The [`Orchestrator`] runs stages with a
//! uniform retry policy, tracks the status of the artifacts they consume,
//! and runs independent stages concurrently while keeping their order.

pub mod stages;

use crate::config::{Config, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnalysisResult, ArtifactStatus, StageRecord, ToolInvocation};
use crate::parsers::OutputParser;
use crate::runner::{next_invocation_id, ToolRequest, ToolRunner};
use crate::storage::{sanitize_filename, ArtifactStore};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Retry settings applied to every tool stage alike.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
    pub exponential: bool,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.exponential {
            let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
            self.backoff.saturating_mul(factor)
        } else {
            self.backoff
        }
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            exponential: config.exponential_backoff,
        }
    }
}

type BuiltinFn = Box<dyn FnOnce() -> PipelineResult<AnalysisResult> + Send>;

/// What a stage does.
pub enum StageWork {
    /// Run an external tool and parse what it produced.
    Tool {
        request: ToolRequest,
        parser: Box<dyn OutputParser>,
    },
    /// Compute the result in-process on a blocking thread.
    Builtin {
        name: String,
        args: Vec<String>,
        compute: BuiltinFn,
    },
}

/// One named unit of pipeline work.
pub struct Stage {
    pub name: String,
    pub work: StageWork,
    /// Registered artifacts this stage reads.
    pub inputs: Vec<PathBuf>,
}

impl Stage {
    pub fn tool(
        name: impl Into<String>,
        request: ToolRequest,
        parser: Box<dyn OutputParser>,
    ) -> Self {
        Self {
            name: name.into(),
            work: StageWork::Tool { request, parser },
            inputs: Vec::new(),
        }
    }

    pub fn builtin<F>(
        name: impl Into<String>,
        builtin: &str,
        args: Vec<String>,
        compute: F,
    ) -> Self
    where
        F: FnOnce() -> PipelineResult<AnalysisResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: StageWork::Builtin {
                name: builtin.to_string(),
                args,
                compute: Box::new(compute),
            },
            inputs: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.inputs = inputs;
        self
    }
}

/// Marks input artifacts `processing` while a stage runs. If the stage
/// future is dropped before finishing (client cancelled), they end `failed`.
struct ArtifactGuard<'a> {
    store: &'a ArtifactStore,
    paths: Vec<PathBuf>,
    finished: bool,
}

impl<'a> ArtifactGuard<'a> {
    fn begin(store: &'a ArtifactStore, inputs: &[PathBuf]) -> Self {
        let paths: Vec<PathBuf> = inputs
            .iter()
            .filter(|p| store.get(p).is_some())
            .cloned()
            .collect();

        for path in &paths {
            store.set_status(path, ArtifactStatus::Processing);
        }

        Self {
            store,
            paths,
            finished: false,
        }
    }

    fn finish(mut self, success: bool) {
        let status = if success {
            ArtifactStatus::Done
        } else {
            ArtifactStatus::Failed
        };
        for path in &self.paths {
            self.store.set_status(path, status);
        }
        self.finished = true;
    }
}

impl Drop for ArtifactGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        for path in &self.paths {
            warn!("Stage abandoned, marking {} failed", path.display());
            self.store.set_status(path, ArtifactStatus::Failed);
        }
    }
}

/// Runs stages against a tool runner and an artifact store.
pub struct Orchestrator {
    runner: Arc<dyn ToolRunner>,
    store: Arc<ArtifactStore>,
    results_dir: PathBuf,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(runner: Arc<dyn ToolRunner>, store: Arc<ArtifactStore>, config: &Config) -> Self {
        Self {
            runner,
            store,
            results_dir: config.storage.results_dir.clone(),
            retry: RetryPolicy::from(&config.pipeline),
            concurrency: config.pipeline.concurrency.max(1),
        }
    }

    #[cfg(test)]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[cfg(test)]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Create a fresh working directory owned by one stage.
    pub fn stage_dir(&self, stage: &str) -> PipelineResult<PathBuf> {
        std::fs::create_dir_all(&self.results_dir).map_err(|e| {
            PipelineError::Storage(format!(
                "Failed to create results directory {}: {}",
                self.results_dir.display(),
                e
            ))
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize_filename(stage)))
            .tempdir_in(&self.results_dir)
            .map_err(|e| {
                PipelineError::Storage(format!("Failed to create stage directory: {}", e))
            })?;

        Ok(dir.keep())
    }

    /// Run one stage: invoke, then parse. Tool failures are returned as-is.
    pub async fn run(&self, stage: Stage) -> PipelineResult<StageRecord> {
        let started = Instant::now();
        let guard = ArtifactGuard::begin(&self.store, &stage.inputs);

        let outcome = match stage.work {
            StageWork::Tool { request, parser } => {
                self.run_tool(&stage.name, request, parser).await
            }
            StageWork::Builtin {
                name,
                args,
                compute,
            } => run_builtin(&name, args, compute).await,
        };

        guard.finish(outcome.is_ok());

        match &outcome {
            Ok(record) => info!(
                "Stage {} ({}) finished in {}ms",
                stage.name,
                record.invocation.tool_name,
                started.elapsed().as_millis()
            ),
            Err(e) => warn!("Stage {} failed: {}", stage.name, e),
        }

        outcome
    }

    async fn run_tool(
        &self,
        stage: &str,
        request: ToolRequest,
        parser: Box<dyn OutputParser>,
    ) -> PipelineResult<StageRecord> {
        let invocation = self.invoke_with_retry(stage, request).await?;
        let tool = parser.tool();
        debug!("Parsing {} output for stage {}", tool, stage);

        // Output files can be large; read and parse them off the runtime.
        let (result, invocation) = tokio::task::spawn_blocking(move || {
            let result = parser.parse(&invocation);
            (result, invocation)
        })
        .await
        .map_err(|e| PipelineError::malformed(tool, format!("parser task failed: {}", e)))?;

        Ok(StageRecord {
            result: result?,
            invocation,
        })
    }

    async fn invoke_with_retry(
        &self,
        stage: &str,
        request: ToolRequest,
    ) -> PipelineResult<ToolInvocation> {
        let mut attempt = 1;

        loop {
            match self.runner.invoke(request.clone()).await {
                Ok(invocation) => return Ok(invocation),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "Stage {} attempt {}/{} failed: {}. Retrying in {:?}",
                        stage, attempt, self.retry.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run independent stages in parallel. Outcomes keep submission order.
    pub async fn run_concurrent(
        &self,
        stages: Vec<Stage>,
    ) -> Vec<(String, PipelineResult<StageRecord>)> {
        stream::iter(stages)
            .map(|stage| async move {
                let name = stage.name.clone();
                (name, self.run(stage).await)
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

async fn run_builtin(
    name: &str,
    args: Vec<String>,
    compute: BuiltinFn,
) -> PipelineResult<StageRecord> {
    let tool_name = ToolInvocation::builtin_name(name);
    let started = Instant::now();

    let result = tokio::task::spawn_blocking(compute)
        .await
        .map_err(|e| PipelineError::ToolExecution {
            tool: tool_name.clone(),
            exit_code: None,
            stderr: e.to_string(),
        })??;

    Ok(StageRecord {
        result,
        invocation: ToolInvocation {
            id: next_invocation_id(),
            tool_name,
            arguments: args,
            working_directory: PathBuf::new(),
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: started.elapsed().as_millis() as u64,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StructurePrediction, TargetGene};
    use crate::parsers::ViennaParser;
    use crate::runner::fake::{FakeOutput, FakeRunner};
    use tempfile::TempDir;

    fn setup(runner: FakeRunner) -> (TempDir, Arc<FakeRunner>, Orchestrator) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.results_dir = temp_dir.path().join("results");
        let store = Arc::new(ArtifactStore::new(temp_dir.path().join("uploads")).unwrap());
        let runner = Arc::new(runner);
        let orchestrator = Orchestrator::new(runner.clone(), store, &config);
        (temp_dir, runner, orchestrator)
    }

    fn fold_stage(orchestrator: &Orchestrator, name: &str) -> Stage {
        let dir = orchestrator.stage_dir(name).unwrap();
        Stage::tool(
            name,
            ToolRequest::new("RNAfold", dir).arg("--noPS"),
            Box::new(ViennaParser::new("GGGAAAUCC")),
        )
    }

    #[test]
    fn test_retry_delays() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: Duration::from_millis(100),
            exponential: true,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));

        let flat = RetryPolicy {
            exponential: false,
            ..policy
        };
        assert_eq!(flat.delay(3), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_run_tool_stage() {
        let runner = FakeRunner::new().script("RNAfold", FakeOutput::ok("(((...))) (-15.20)\n"));
        let (_temp, runner, orchestrator) = setup(runner);

        let record = orchestrator.run(fold_stage(&orchestrator, "structure")).await.unwrap();
        assert_eq!(
            record.result,
            AnalysisResult::Structure(StructurePrediction {
                structure: "(((...)))".to_string(),
                energy: -15.2,
            })
        );
        assert_eq!(record.invocation.tool_name, "RNAfold");
        assert_eq!(runner.calls_for("RNAfold"), 1);
    }

    /// Folds like `ViennaParser` but holds its thread for a while first.
    struct SlowParser(Duration);

    impl OutputParser for SlowParser {
        fn tool(&self) -> &'static str {
            "RNAfold"
        }

        fn parse(&self, invocation: &ToolInvocation) -> PipelineResult<AnalysisResult> {
            std::thread::sleep(self.0);
            ViennaParser::new("GGGAAAUCC").parse(invocation)
        }
    }

    #[tokio::test]
    async fn test_parsing_does_not_stall_the_runtime() {
        let runner = FakeRunner::new().script("RNAfold", FakeOutput::ok("(((...))) (-1.00)\n"));
        let (_temp, _runner, orchestrator) = setup(runner);
        let dir = orchestrator.stage_dir("slow_parse").unwrap();
        let stage = Stage::tool(
            "slow_parse",
            ToolRequest::new("RNAfold", dir),
            Box::new(SlowParser(Duration::from_millis(400))),
        );

        let started = Instant::now();
        let (outcome, ticked) = tokio::join!(orchestrator.run(stage), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            started.elapsed()
        });

        assert!(outcome.is_ok());
        assert!(ticked < Duration::from_millis(300), "runtime blocked for {:?}", ticked);
    }

    #[tokio::test]
    async fn test_tool_failure_short_circuits() {
        let runner = FakeRunner::new().script("RNAfold", FakeOutput::failing(1, "segfault"));
        let (_temp, _runner, orchestrator) = setup(runner);

        let err = orchestrator.run(fold_stage(&orchestrator, "structure")).await.unwrap_err();
        assert!(matches!(err, PipelineError::ToolExecution { .. }));
        assert!(err.to_string().contains("segfault"));
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let runner = FakeRunner::new()
            .script("RNAfold", FakeOutput::failing(1, "flaky"))
            .script("RNAfold", FakeOutput::ok("(((...))) (-1.00)\n"));
        let (_temp, runner, orchestrator) = setup(runner);

        assert!(orchestrator.run(fold_stage(&orchestrator, "s")).await.is_err());
        assert_eq!(runner.calls_for("RNAfold"), 1);
    }

    #[tokio::test]
    async fn test_retry_policy_recovers() {
        let runner = FakeRunner::new()
            .script("RNAfold", FakeOutput::failing(1, "flaky"))
            .script("RNAfold", FakeOutput::ok("(((...))) (-1.00)\n"));
        let (_temp, runner, orchestrator) = setup(runner);
        let orchestrator = orchestrator.with_retry(RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
            exponential: true,
        });

        assert!(orchestrator.run(fold_stage(&orchestrator, "s")).await.is_ok());
        assert_eq!(runner.calls_for("RNAfold"), 2);
    }

    #[tokio::test]
    async fn test_parse_errors_not_retried() {
        let runner = FakeRunner::new().script("RNAfold", FakeOutput::ok("((.)) (-1.00)\n"));
        let (_temp, runner, orchestrator) = setup(runner);
        let orchestrator = orchestrator.with_retry(RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
            exponential: false,
        });

        let err = orchestrator.run(fold_stage(&orchestrator, "s")).await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOutput { .. }));
        assert_eq!(runner.calls_for("RNAfold"), 1);
    }

    #[tokio::test]
    async fn test_artifact_status_follows_stage() {
        let runner = FakeRunner::new()
            .script("RNAfold", FakeOutput::ok("(((...))) (-1.00)\n"))
            .script("bad", FakeOutput::failing(2, "boom"));
        let (_temp, _runner, orchestrator) = setup(runner);

        let ok_input = orchestrator
            .store()
            .register("hostGenome", "a.fa", b">a\nAC\n")
            .await
            .unwrap();
        let bad_input = orchestrator
            .store()
            .register("hostGenome", "b.fa", b">b\nAC\n")
            .await
            .unwrap();

        let stage = fold_stage(&orchestrator, "ok").with_inputs(vec![ok_input.path.clone()]);
        orchestrator.run(stage).await.unwrap();

        let dir = orchestrator.stage_dir("bad").unwrap();
        let stage = Stage::tool(
            "bad",
            ToolRequest::new("bad", dir),
            Box::new(ViennaParser::new("A")),
        )
        .with_inputs(vec![bad_input.path.clone()]);
        orchestrator.run(stage).await.unwrap_err();

        let store = orchestrator.store();
        assert_eq!(store.get(&ok_input.path).unwrap().status, ArtifactStatus::Done);
        assert_eq!(store.get(&bad_input.path).unwrap().status, ArtifactStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_stage_marks_inputs_failed() {
        let runner = FakeRunner::new().script(
            "RNAfold",
            FakeOutput::ok("(((...))) (-1.00)\n").with_delay(Duration::from_secs(30)),
        );
        let (_temp, _runner, orchestrator) = setup(runner);
        let input = orchestrator
            .store()
            .register("parasiteGenome", "p.fa", b">p\nAC\n")
            .await
            .unwrap();

        let stage = fold_stage(&orchestrator, "slow").with_inputs(vec![input.path.clone()]);
        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), orchestrator.run(stage)).await;
        assert!(cancelled.is_err());

        assert_eq!(
            orchestrator.store().get(&input.path).unwrap().status,
            ArtifactStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_builtin_stage_is_traceable() {
        let (_temp, _runner, orchestrator) = setup(FakeRunner::new());

        let stage = Stage::builtin("map_tes", "nearest_gene", vec!["max_distance=10".into()], || {
            Ok(AnalysisResult::TargetGenes(vec![TargetGene {
                te_id: "TE1".into(),
                gene_id: "GENE001".into(),
                te_distance: 3,
            }]))
        });

        let record = orchestrator.run(stage).await.unwrap();
        assert!(record.invocation.is_builtin());
        assert_eq!(record.invocation.tool_name, "builtin:nearest_gene");
        assert_eq!(record.invocation.arguments, vec!["max_distance=10"]);
    }

    #[tokio::test]
    async fn test_run_concurrent_keeps_order_and_failures() {
        let runner = FakeRunner::new()
            .script(
                "RNAfold",
                FakeOutput::ok("(((...))) (-1.00)\n").with_delay(Duration::from_millis(30)),
            )
            .script("RepeatMasker", FakeOutput::failing(1, "no species"));
        let (_temp, _runner, orchestrator) = setup(runner);

        let dir = orchestrator.stage_dir("repeatmasker").unwrap();
        let stages = vec![
            fold_stage(&orchestrator, "structure_a"),
            Stage::tool(
                "repeatmasker",
                ToolRequest::new("RepeatMasker", dir),
                Box::new(crate::parsers::RepeatMaskerParser::new("g.fa")),
            ),
            fold_stage(&orchestrator, "structure_b"),
        ];

        let outcomes = orchestrator.run_concurrent(stages).await;
        let names: Vec<&str> = outcomes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["structure_a", "repeatmasker", "structure_b"]);
        assert!(outcomes[0].1.is_ok());
        assert!(outcomes[1].1.is_err());
        assert!(outcomes[2].1.is_ok());
    }

    #[test]
    fn test_stage_dirs_are_exclusive() {
        let (temp, _runner, orchestrator) = setup(FakeRunner::new());
        let a = orchestrator.stage_dir("salmon").unwrap();
        let b = orchestrator.stage_dir("salmon").unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
        assert!(a.starts_with(temp.path().join("results")));
    }
}
