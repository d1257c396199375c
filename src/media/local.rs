use async_trait::async_trait;
use tracing::{debug, info};

use super::commands::MediaCommandBuilder;
use super::executor::{JobDirs, JobExecutor};
use super::{collect_output_files, JobEnvironment, SandboxRunner};
use crate::config::SandboxConfig;
use crate::error::{ChunkcodeError, Result};
use crate::protocol::{JobRequest, JobResult};

/// Runs jobs directly on the host.
///
/// Isolation is limited to the per-task directories handed over in the
/// [`JobEnvironment`]; paths in the request are used as they are.
pub struct LocalRunner {
    builder: MediaCommandBuilder,
    executor: JobExecutor,
}

impl LocalRunner {
    pub fn new(config: SandboxConfig) -> Self {
        let builder = MediaCommandBuilder::new(&config.ffmpeg_path, &config.ffprobe_path);
        let executor = JobExecutor::new(builder.clone());
        Self { builder, executor }
    }
}

#[async_trait]
impl SandboxRunner for LocalRunner {
    async fn run(&self, job: &JobRequest, env: &JobEnvironment) -> Result<JobResult> {
        env.dirs.ensure_exists().await?;

        if let Some(missing) = env.binds.iter().find(|b| !b.exists()) {
            return Err(ChunkcodeError::FileNotFound(missing.display().to_string()));
        }

        let dirs = JobDirs {
            resources: env.dirs.resources.clone(),
            work: env.dirs.work.clone(),
            output: env.dirs.output.clone(),
        };

        debug!("Running {} job locally [timeout = {:?}]", job.command_name(), env.timeout);
        tokio::time::timeout(env.timeout, self.executor.execute(job, &dirs))
            .await
            .map_err(|_| ChunkcodeError::Timeout {
                description: format!("{} job", job.command_name()),
                seconds: env.timeout.as_secs(),
            })??;

        Ok(collect_output_files(&env.dirs.output))
    }

    async fn check_availability(&self) -> Result<()> {
        let version = self.builder.version_check().execute_to_string().await?;
        info!(
            "Media processor is available: {}",
            version.lines().next().unwrap_or("Unknown version")
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
