use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ChunkcodeError, Result};
use crate::media::{SandboxRunner, SandboxRunnerFactory};
use crate::operator::StreamOperator;
use crate::protocol::video_only_name;
use crate::task::{TaskBuilder, TaskDefinition, TranscodeTask};
use crate::verify::{diff, DiffOptions, DiffRecord, ProbeReport};
use crate::workdir::TaskDirs;

/// Where a task is in its lifecycle. `Finished` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Extracting,
    Splitting,
    Transcoding,
    Merging,
    Replacing,
    Verifying,
    Finished,
    Failed(String),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failed(_))
    }
}

/// Outcome of one transcoding task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: TaskState,
    pub chunk_count: usize,
    /// `None` when verification is disabled
    pub diff: Option<Vec<DiffRecord>>,
}

impl TaskReport {
    fn new(task_id: Uuid, input: &Path) -> Self {
        Self {
            task_id,
            input: input.to_path_buf(),
            output: None,
            started_at: Utc::now(),
            finished_at: None,
            state: TaskState::Created,
            chunk_count: 0,
            diff: None,
        }
    }

    fn enter(&mut self, state: TaskState) {
        info!("Task {}: {:?}", self.task_id, state);
        if state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.state = state;
    }

    /// Finished, and the output matched the input structurally (or was not checked).
    pub fn is_success(&self) -> bool {
        self.state == TaskState::Finished && self.diff.as_ref().is_none_or(|d| d.is_empty())
    }
}

pub struct Workflow {
    config: Config,
    operator: StreamOperator,
    progress: ProgressBar,
}

impl Workflow {
    /// Workflow with the runner selected in the configuration. Fails when
    /// the runner cannot execute jobs on this host.
    pub async fn new(config: Config) -> Result<Self> {
        let runner = SandboxRunnerFactory::create_runner(&config.sandbox);
        runner.check_availability().await?;
        Ok(Self::with_runner(config, runner))
    }

    pub fn with_runner(config: Config, runner: Arc<dyn SandboxRunner>) -> Self {
        let operator = StreamOperator::new(
            runner,
            config.sandbox.job_timeout(),
            config.pipeline.worker_count(),
        );
        Self {
            config,
            operator,
            progress: ProgressBar::hidden(),
        }
    }

    /// Bar advanced once per finished chunk transcode.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    fn work_root(&self) -> Result<PathBuf> {
        Ok(std::path::absolute(&self.config.pipeline.work_root)?)
    }

    /// Run one task end to end.
    ///
    /// Invalid definitions, a missing input and an existing output are
    /// returned as errors before anything is dispatched. Failures after that
    /// end the task in [`TaskState::Failed`] and are reported, not raised.
    pub async fn run(&self, definition: &TaskDefinition) -> Result<TaskReport> {
        let mut task = TaskBuilder::build(definition)?;

        task.input = fs::canonicalize(&task.input)
            .await
            .map_err(|_| ChunkcodeError::FileNotFound(task.input.display().to_string()))?;
        task.output = std::path::absolute(&task.output)?;
        if task.output.exists() {
            return Err(ChunkcodeError::OutputExists(task.output.display().to_string()));
        }

        let task_id = Uuid::new_v4();
        let dirs = TaskDirs::new(self.work_root()?, &task_id.to_string());
        let mut report = TaskReport::new(task_id, &task.input);
        info!(
            "Task {} started: {} -> {} [parts = {}]",
            task_id,
            task.input.display(),
            task.output.display(),
            task.subtasks_count
        );

        match self.execute(&task, &dirs, &mut report).await {
            Ok(()) => report.enter(TaskState::Finished),
            Err(e) => {
                warn!("Task {} failed: {}", task_id, e);
                report.enter(TaskState::Failed(e.to_string()));
            }
        }

        if self.config.pipeline.keep_work_dirs {
            info!("Keeping task directory {}", dirs.root().display());
        } else {
            dirs.cleanup().await;
        }

        Ok(report)
    }

    async fn execute(&self, task: &TranscodeTask, dirs: &TaskDirs, report: &mut TaskReport) -> Result<()> {
        dirs.create().await?;

        report.enter(TaskState::Extracting);
        let video_only = self.operator.extract_video_streams(&task.input, dirs).await?;

        report.enter(TaskState::Splitting);
        let chunks = self
            .operator
            .split_video(&video_only, task.subtasks_count, dirs)
            .await?;
        report.chunk_count = chunks.len();

        report.enter(TaskState::Transcoding);
        self.progress.set_length(chunks.len() as u64);
        self.progress.set_position(0);
        let transcoded = self
            .operator
            .transcode_all(&chunks, task.transcode_args(), &task.output_extension(), dirs, &self.progress)
            .await?;
        self.progress.finish();

        report.enter(TaskState::Merging);
        let merged = self
            .operator
            .merge_video(&video_only_name(&task.output), dirs, &transcoded)
            .await?;

        report.enter(TaskState::Replacing);
        let replaced = self
            .operator
            .replace_video_streams(&task.input, &merged, &task.output_name()?, dirs)
            .await?;
        place_output(&replaced, &task.output).await?;
        report.output = Some(task.output.clone());

        if self.config.verify.enabled {
            report.enter(TaskState::Verifying);
            let records = self.verify(task, dirs).await?;
            if records.is_empty() {
                info!("Output is structurally equivalent to the input");
            } else {
                warn!("Output differs from the input in {} places", records.len());
            }
            report.diff = Some(records);
        }

        Ok(())
    }

    /// Diff the task's output against its input, accepting the changes the
    /// task asked for.
    ///
    /// The output is the reference side here: overrides stand in for the
    /// input's values, so a requested codec or resolution is what the
    /// output is expected to show.
    pub async fn verify(&self, task: &TranscodeTask, dirs: &TaskDirs) -> Result<Vec<DiffRecord>> {
        let original = self.probe_into(&task.input, &dirs.verify("original")).await?;
        let transcoded = self.probe_into(&task.output, &dirs.verify("transcoded")).await?;
        let options = task.expected_changes(DiffOptions::from_config(&self.config.verify)?);
        Ok(diff(&transcoded, &original, &options))
    }

    /// Probe a single file through the sandbox.
    pub async fn probe(&self, file: &Path) -> Result<ProbeReport> {
        let file = fs::canonicalize(file)
            .await
            .map_err(|_| ChunkcodeError::FileNotFound(file.display().to_string()))?;
        let dirs = TaskDirs::new(self.work_root()?, &format!("probe-{}", Uuid::new_v4()));
        let result = self.probe_into(&file, &dirs.verify("probe")).await;
        dirs.cleanup().await;
        result
    }

    async fn probe_into(&self, file: &Path, scratch: &Path) -> Result<ProbeReport> {
        let (directory, name) = match (file.parent(), file.file_name()) {
            (Some(directory), Some(name)) => (directory, PathBuf::from(name)),
            _ => return Err(ChunkcodeError::FileNotFound(file.display().to_string())),
        };

        let documents = self
            .operator
            .get_metadata(&[name], directory, &scratch.join("work"), &scratch.join("output"))
            .await?;
        let document = documents
            .first()
            .ok_or_else(|| ChunkcodeError::Structural("Probe returned no metadata".to_string()))?;
        ProbeReport::from_file(document)
    }
}

/// Move the finished file out of the task directory, copying when the
/// destination is on another filesystem. Never replaces an existing file.
async fn place_output(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    match fs::hard_link(from, to).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(ChunkcodeError::OutputExists(to.display().to_string()));
        }
        Err(e) => {
            debug!("Cannot link {} to {} ({}), copying", from.display(), to.display(), e);
            copy_to_new_file(from, to).await?;
        }
    }
    fs::remove_file(from).await?;
    info!("Output written to {}", to.display());
    Ok(())
}

/// Copy into a file that must not exist yet; a failed copy leaves nothing behind.
async fn copy_to_new_file(from: &Path, to: &Path) -> Result<()> {
    let mut target = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(to)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => ChunkcodeError::OutputExists(to.display().to_string()),
            _ => ChunkcodeError::Io(e),
        })?;

    let copied = async {
        let mut source = fs::File::open(from).await?;
        tokio::io::copy(&mut source, &mut target).await?;
        target.sync_all().await
    }
    .await;

    if let Err(e) = copied {
        drop(target);
        if let Err(remove_error) = fs::remove_file(to).await {
            warn!("Failed to remove partial output {}: {}", to.display(), remove_error);
        }
        return Err(e.into());
    }
    Ok(())
}
