// Sandboxed media processing
//
// This module provides the seam between the orchestrator and the isolated
// environment that actually runs ffmpeg:
// - Commands: ffmpeg / ffprobe argv builders
// - Manifest: ordering of transcoded chunks for the concat step
// - Executor: the dispatcher that runs inside the sandbox
// - Local / Container: `SandboxRunner` implementations

pub mod commands;
pub mod container;
pub mod executor;
pub mod local;
pub mod manifest;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

pub use commands::*;
pub use container::ContainerRunner;
pub use executor::{JobDirs, JobExecutor};
pub use local::LocalRunner;

use crate::config::{RunnerKind, SandboxConfig};
use crate::error::Result;
use crate::protocol::{JobRequest, JobResult};

/// Host directories mounted into the sandbox for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct DirMapping {
    pub resources: PathBuf,
    pub temporary: PathBuf,
    pub work: PathBuf,
    pub output: PathBuf,
    pub logs: PathBuf,
}

impl DirMapping {
    pub fn new(resources: &Path, temporary: &Path, work: &Path, output: &Path, logs: &Path) -> Self {
        Self {
            resources: resources.to_path_buf(),
            temporary: temporary.to_path_buf(),
            work: work.to_path_buf(),
            output: output.to_path_buf(),
            logs: logs.to_path_buf(),
        }
    }

    pub async fn ensure_exists(&self) -> Result<()> {
        for dir in [&self.resources, &self.temporary, &self.work, &self.output, &self.logs] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

/// Everything a runner needs to execute one job. Passed explicitly with
/// every call; runners keep no per-job state between calls.
#[derive(Debug, Clone)]
pub struct JobEnvironment {
    pub dirs: DirMapping,
    /// Host files outside the mapped directories that the job reads.
    pub binds: Vec<PathBuf>,
    pub timeout: Duration,
}

impl JobEnvironment {
    pub fn new(dirs: DirMapping, timeout: Duration) -> Self {
        Self {
            dirs,
            binds: Vec::new(),
            timeout,
        }
    }

    pub fn with_bind<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.binds.push(path.as_ref().to_path_buf());
        self
    }
}

/// Executes one job in an isolated environment
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    /// Run the job and report the files left in the output directory.
    /// Non-zero exits and timeouts are errors; nothing is retried.
    async fn run(&self, job: &JobRequest, env: &JobEnvironment) -> Result<JobResult>;

    /// Check if the runner can execute jobs on this host
    async fn check_availability(&self) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Factory for creating sandbox runner instances
pub struct SandboxRunnerFactory;

impl SandboxRunnerFactory {
    pub fn create_runner(config: &SandboxConfig) -> Arc<dyn SandboxRunner> {
        match config.runner {
            RunnerKind::Local => Arc::new(LocalRunner::new(config.clone())),
            RunnerKind::Container => Arc::new(ContainerRunner::new(config.clone())),
        }
    }
}

/// Files in `output`, sorted, as the job result.
pub fn collect_output_files(output: &Path) -> JobResult {
    let mut data: Vec<PathBuf> = WalkDir::new(output)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();
    data.sort();
    JobResult { data, status: None }
}
