//! Simulation-backed fitness evaluation.
//!
//! A [`SimulationPipeline`] evaluates one design by applying its parameters
//! to an isolated evaluation directory, waiting for the design to settle,
//! running the simulation command there and parsing the metric files it
//! writes. Every evaluation gets its own directory, so concurrent
//! evaluations never share design state or output files.
//!
//! The three collaborators are traits so the pipeline can drive a remote
//! runner or a live design editor as well as local processes.

mod design;
mod parse;
mod process;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::compute::evolution::{CancelToken, EvaluationError, FitnessFunction};
use crate::schema::{Metrics, ParamVector, SimulationConfig};

pub use design::{PARAMETER_FILE, ParameterFileWriter};
pub use parse::{extract_metric, numeric_tokens};
pub use process::{LocalResultReader, ProcessRunner};

/// Everything an evaluation needs to know about where it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationContext {
    /// Sequence number of the evaluation within this pipeline.
    pub id: u64,
    /// Private working directory of this evaluation.
    pub work_dir: PathBuf,
    /// Shared, read-only project directory.
    pub project_dir: PathBuf,
    pub project_name: String,
    /// Design element the parameters apply to.
    pub target: Option<String>,
    /// Pattern or shape kind generated on the target.
    pub pattern: Option<String>,
}

/// Applies a parameter vector to the design of one evaluation.
#[async_trait]
pub trait DesignMutator: Send + Sync {
    /// Returns once any dependent geometry has been regenerated.
    async fn apply(
        &self,
        context: &EvaluationContext,
        params: &ParamVector,
    ) -> Result<(), EvaluationError>;
}

/// Output stream of a simulation process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives each output line of a running process.
pub type LineSink<'a> = dyn for<'s> Fn(OutputStream, &'s str) + Send + Sync + 'a;

/// Collected result of a finished simulation process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    /// Exit code; `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes simulation commands.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run to completion and return everything the process printed.
    async fn execute(
        &self,
        command: &[String],
        work_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<ScriptOutput, EvaluationError>;

    /// Run to completion, reporting each output line as it arrives.
    async fn execute_streaming(
        &self,
        command: &[String],
        work_dir: &Path,
        cancel: &CancelToken,
        on_line: &LineSink<'_>,
    ) -> Result<ScriptOutput, EvaluationError> {
        let output = self.execute(command, work_dir, cancel).await?;
        for line in output.stdout.lines() {
            on_line(OutputStream::Stdout, line);
        }
        for line in output.stderr.lines() {
            on_line(OutputStream::Stderr, line);
        }
        Ok(output)
    }
}

/// Reads files produced by a simulation.
#[async_trait]
pub trait ResultReader: Send + Sync {
    async fn read_file(&self, dir: &Path, relative: &str) -> Result<Vec<u8>, EvaluationError>;
}

/// Last lines of process stderr kept in error reports.
const STDERR_TAIL_LINES: usize = 20;

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n")
}

/// One past the highest `eval_<n>` directory in `runs_dir`.
fn next_free_id(runs_dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(runs_dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()?
                .strip_prefix("eval_")?
                .parse::<u64>()
                .ok()
        })
        .max()
        .map_or(0, |id| id + 1)
}

/// The full apply, settle, simulate, parse chain as a [`FitnessFunction`].
pub struct SimulationPipeline<D, S, R> {
    config: SimulationConfig,
    mutator: D,
    runner: S,
    reader: R,
    next_id: AtomicU64,
}

impl SimulationPipeline<ParameterFileWriter, ProcessRunner, LocalResultReader> {
    /// Pipeline running the configured command as a local process.
    pub fn local(config: SimulationConfig) -> Self {
        let runner = ProcessRunner::new(Duration::from_secs(config.timeout_secs));
        Self::new(config, ParameterFileWriter, runner, LocalResultReader)
    }
}

impl<D, S, R> SimulationPipeline<D, S, R>
where
    D: DesignMutator,
    S: ScriptRunner,
    R: ResultReader,
{
    /// Evaluation ids continue after any `eval_<n>` directory already in
    /// the runs directory, so a resumed session keeps earlier outputs.
    pub fn new(config: SimulationConfig, mutator: D, runner: S, reader: R) -> Self {
        let first_id = next_free_id(&config.project_dir.join("runs"));
        Self {
            config,
            mutator,
            runner,
            reader,
            next_id: AtomicU64::new(first_id),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Directory holding all evaluation directories.
    pub fn runs_dir(&self) -> PathBuf {
        self.config.project_dir.join("runs")
    }

    /// Allocate the context of the next evaluation.
    pub fn next_context(&self) -> EvaluationContext {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        EvaluationContext {
            id,
            work_dir: self.runs_dir().join(format!("eval_{id}")),
            project_dir: self.config.project_dir.clone(),
            project_name: self.config.project_name.clone(),
            target: self.config.target.clone(),
            pattern: self.config.pattern.clone(),
        }
    }

    /// The configured command with placeholders substituted.
    pub fn command_for(&self, context: &EvaluationContext) -> Vec<String> {
        // The process runs inside the work dir, so relative paths would not resolve.
        let absolute = |path: &Path| {
            std::path::absolute(path)
                .unwrap_or_else(|_| path.to_path_buf())
                .display()
                .to_string()
        };
        let work_dir = absolute(&context.work_dir);
        let project_dir = absolute(&context.project_dir);
        self.config
            .command
            .iter()
            .map(|arg| {
                arg.replace("{project_dir}", &project_dir)
                    .replace("{project}", &context.project_name)
                    .replace("{work_dir}", &work_dir)
            })
            .collect()
    }

    async fn prepare_dir(&self, context: &EvaluationContext) -> Result<(), EvaluationError> {
        let dir = &context.work_dir;
        let design_error = |e: std::io::Error| {
            EvaluationError::Design(format!("{}: {e}", dir.display()))
        };

        // Results left behind in a reused directory must not be read back.
        if tokio::fs::try_exists(dir).await.map_err(design_error)? {
            tokio::fs::remove_dir_all(dir).await.map_err(design_error)?;
        }
        tokio::fs::create_dir_all(dir).await.map_err(design_error)
    }

    async fn read_metrics(&self, context: &EvaluationContext) -> Result<Metrics, EvaluationError> {
        let mut metrics = Metrics::new();
        for source in &self.config.metric_files {
            let file = source.file_name(&context.project_name);
            let bytes = self.reader.read_file(&context.work_dir, &file).await?;
            let text = String::from_utf8_lossy(&bytes);
            let value =
                extract_metric(&text, source.extract).map_err(|reason| EvaluationError::Parse {
                    metric: source.metric.clone(),
                    file: file.clone(),
                    reason,
                })?;
            metrics.insert(source.metric.clone(), value);
        }
        Ok(metrics)
    }
}

#[async_trait]
impl<D, S, R> FitnessFunction for SimulationPipeline<D, S, R>
where
    D: DesignMutator,
    S: ScriptRunner,
    R: ResultReader,
{
    async fn evaluate(
        &self,
        params: &ParamVector,
        cancel: &CancelToken,
    ) -> Result<Metrics, EvaluationError> {
        cancel.check()?;
        let context = self.next_context();
        debug!("Evaluation {} in {}", context.id, context.work_dir.display());

        self.prepare_dir(&context).await?;
        self.mutator.apply(&context, params).await?;
        cancel.check()?;

        if self.config.settle_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
            cancel.check()?;
        }

        let command = self.command_for(&context);
        let output = if self.config.stream_output {
            let id = context.id;
            self.runner
                .execute_streaming(
                    &command,
                    &context.work_dir,
                    cancel,
                    &move |stream: OutputStream, line: &str| match stream {
                        OutputStream::Stdout => info!("[eval {id}] {line}"),
                        OutputStream::Stderr => debug!("[eval {id}] {line}"),
                    },
                )
                .await?
        } else {
            self.runner
                .execute(&command, &context.work_dir, cancel)
                .await?
        };
        if !output.success() {
            return Err(EvaluationError::ProcessFailed {
                code: output.exit_code,
                stderr: stderr_tail(&output.stderr),
            });
        }
        cancel.check()?;

        let metrics = self.read_metrics(&context).await?;
        debug!("Evaluation {} metrics: {:?}", context.id, metrics);

        if self.config.cleanup_on_success {
            if let Err(e) = tokio::fs::remove_dir_all(&context.work_dir).await {
                warn!("Failed to remove {}: {e}", context.work_dir.display());
            }
        }
        Ok(metrics)
    }
}
