use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::{ChunkcodeError, Result};
use crate::media::{DirMapping, JobEnvironment, SandboxRunner};
use crate::protocol::{
    transcoded_chunk_name, video_only_name, JobRequest, JobResult, MetadataRequest, MetricsParams,
    SplitResults, StreamType, TranscodeArgs, SPLIT_RESULTS_FILE,
};
use crate::workdir::TaskDirs;

/// One time slice of the video-only stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub video_segment: PathBuf,
    pub playlist: Option<PathBuf>,
}

/// Drives the sandboxed stages of one transcoding task.
///
/// Every method dispatches exactly one job per call (except
/// [`StreamOperator::transcode_all`]) and blocks until it finishes.
#[derive(Clone)]
pub struct StreamOperator {
    runner: Arc<dyn SandboxRunner>,
    job_timeout: Duration,
    max_parallel_jobs: usize,
}

impl StreamOperator {
    pub fn new(runner: Arc<dyn SandboxRunner>, job_timeout: Duration, max_parallel_jobs: usize) -> Self {
        Self {
            runner,
            job_timeout,
            max_parallel_jobs: max_parallel_jobs.clamp(1, Semaphore::MAX_PERMITS),
        }
    }

    fn environment(&self, dirs: DirMapping) -> JobEnvironment {
        JobEnvironment::new(dirs, self.job_timeout)
    }

    async fn dispatch(&self, job: &JobRequest, env: &JobEnvironment) -> Result<JobResult> {
        debug!("Dispatching {} to {} runner: {:?}", job.command_name(), self.runner.name(), job);
        self.runner.run(job, env).await
    }

    fn require_result(result: &JobResult, expected: &Path) -> Result<()> {
        if result.data.iter().any(|p| p == expected) {
            Ok(())
        } else {
            Err(ChunkcodeError::Structural(format!(
                "Result file {} does not exist",
                expected.display()
            )))
        }
    }

    /// Copy only the video streams of `input` into `<output>/<stem>[video-only]<ext>`.
    pub async fn extract_video_streams(&self, input: &Path, dirs: &TaskDirs) -> Result<PathBuf> {
        let output = dirs.output().join(video_only_name(input));
        let env = self.environment(dirs.stage_mapping()).with_bind(input);
        let job = JobRequest::Extract {
            input_file: input.to_path_buf(),
            output_file: output.clone(),
            selected_streams: vec![StreamType::Video.selector().to_string()],
        };

        info!("Extracting video streams from {}", input.display());
        let result = self.dispatch(&job, &env).await?;
        Self::require_result(&result, &output)?;
        Ok(output)
    }

    /// Cut the video-only stream into roughly `parts` chunks. The sandbox
    /// decides the real count, so callers must take the returned list as is.
    pub async fn split_video(&self, video_only: &Path, parts: u32, dirs: &TaskDirs) -> Result<Vec<Chunk>> {
        let env = self.environment(dirs.stage_mapping());
        let job = JobRequest::Split {
            path_to_stream: video_only.to_path_buf(),
            parts,
        };

        let result = self.dispatch(&job, &env).await?;
        let results_file = dirs.output().join(SPLIT_RESULTS_FILE);
        Self::require_result(&result, &results_file)?;

        let content = tokio::fs::read_to_string(&results_file).await?;
        let results: SplitResults = serde_json::from_str(&content)?;
        if !results.is_success() {
            return Err(ChunkcodeError::Structural(format!(
                "Splitting video failed with status {}",
                results.status.unwrap_or_default()
            )));
        }

        // Segment paths are reported as the sandbox saw them; the files
        // themselves sit in the split output directory.
        let chunks: Vec<Chunk> = results
            .segments
            .into_iter()
            .enumerate()
            .map(|(index, segment)| {
                let name = segment.video_segment.file_name().map(PathBuf::from).unwrap_or_default();
                Chunk {
                    index,
                    video_segment: dirs.output().join(name),
                    playlist: segment.playlist,
                }
            })
            .collect();

        if chunks.is_empty() {
            return Err(ChunkcodeError::Structural(format!(
                "Splitting {} produced no segments",
                video_only.display()
            )));
        }

        info!(
            "Stream {} was split into {} chunks [requested = {}]",
            video_only.display(),
            chunks.len(),
            parts
        );
        Ok(chunks)
    }

    /// Transcode one chunk into `<resources>/<stem>_TC<extension>`.
    pub async fn transcode(
        &self,
        chunk: &Chunk,
        targs: &TranscodeArgs,
        output_extension: &str,
        dirs: &TaskDirs,
    ) -> Result<PathBuf> {
        let output = dirs
            .resources()
            .join(transcoded_chunk_name(&chunk.video_segment, output_extension));
        let env = self.environment(dirs.chunk_mapping(chunk.index));
        let job = JobRequest::Transcode {
            track: chunk.video_segment.clone(),
            targs: targs.clone(),
            output_stream: output.clone(),
        };

        let result = self.dispatch(&job, &env).await?;
        Self::require_result(&result, &output)?;
        debug!("Chunk {} transcoded to {}", chunk.index, output.display());
        Ok(output)
    }

    /// Transcode every chunk, at most `max_parallel_jobs` at a time, and
    /// wait for all of them. The first failure cancels the rest.
    /// Outputs are returned in chunk order.
    pub async fn transcode_all(
        &self,
        chunks: &[Chunk],
        targs: &TranscodeArgs,
        output_extension: &str,
        dirs: &TaskDirs,
        progress: &ProgressBar,
    ) -> Result<Vec<PathBuf>> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_jobs));
        let mut jobs = JoinSet::new();

        for chunk in chunks {
            let operator = self.clone();
            let semaphore = semaphore.clone();
            let chunk = chunk.clone();
            let targs = targs.clone();
            let extension = output_extension.to_string();
            let dirs = dirs.clone();
            let progress = progress.clone();

            jobs.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| ChunkcodeError::Sandbox("Failed to acquire a job slot".to_string()))?;
                let output = operator.transcode(&chunk, &targs, &extension, &dirs).await?;
                progress.inc(1);
                Ok::<_, ChunkcodeError>((chunk.index, output))
            });
        }

        let mut outputs = Vec::with_capacity(chunks.len());
        while let Some(joined) = jobs.join_next().await {
            let outcome = joined.map_err(|e| ChunkcodeError::Sandbox(format!("Transcode task failed: {}", e)))?;
            match outcome {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    jobs.abort_all();
                    return Err(e);
                }
            }
        }

        outputs.sort_by_key(|(index, _)| *index);
        Ok(outputs.into_iter().map(|(_, path)| path).collect())
    }

    /// Concatenate transcoded chunks into `<merge output>/<filename>`.
    /// All chunks must exist and sit directly in the task's resources dir.
    pub async fn merge_video(&self, filename: &str, dirs: &TaskDirs, chunks: &[PathBuf]) -> Result<PathBuf> {
        let resources = dirs.resources();
        for chunk in chunks {
            if !chunk.is_file() {
                return Err(ChunkcodeError::Structural(format!("Missing result file: {}", chunk.display())));
            }
            if chunk.parent() != Some(resources.as_path()) {
                return Err(ChunkcodeError::Structural(format!(
                    "Result file: {} should be in the proper directory: {}",
                    chunk.display(),
                    resources.display()
                )));
            }
        }

        let mapping = dirs.merge_mapping();
        mapping.ensure_exists().await?;
        let output = mapping.output.join(filename);
        let job = JobRequest::Merge {
            chunks: chunks.to_vec(),
            output_stream: output.clone(),
        };

        info!("Merging {} chunks", chunks.len());
        let result = self.dispatch(&job, &self.environment(mapping)).await?;
        Self::require_result(&result, &output)?;
        info!("Video merged successfully");
        Ok(output)
    }

    /// Build `<merge output>/<output_name>` from every non-video stream of
    /// `input` plus the video streams of `merged`.
    pub async fn replace_video_streams(
        &self,
        input: &Path,
        merged: &Path,
        output_name: &str,
        dirs: &TaskDirs,
    ) -> Result<PathBuf> {
        if !input.is_file() {
            return Err(ChunkcodeError::FileNotFound(input.display().to_string()));
        }

        let mapping = dirs.merge_mapping();
        let output = mapping.output.join(output_name);
        let env = self.environment(mapping).with_bind(input);
        let job = JobRequest::Replace {
            input_file: input.to_path_buf(),
            replacement_source: merged.to_path_buf(),
            output_file: output.clone(),
            stream_type: StreamType::Video,
        };

        info!("Replacing original video streams with merged ones");
        let result = self.dispatch(&job, &env).await?;
        Self::require_result(&result, &output)?;
        Ok(output)
    }

    /// Probe `files` (relative to `resources_dir`, or absolute inside it)
    /// and return one metadata document per file. `output_dir` should be
    /// empty since every file in it counts as a result.
    pub async fn get_metadata(
        &self,
        files: &[PathBuf],
        resources_dir: &Path,
        work_dir: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        if !resources_dir.is_dir() {
            return Err(ChunkcodeError::FileNotFound(resources_dir.display().to_string()));
        }

        let mut requests = Vec::with_capacity(files.len());
        for file in files {
            let relative = if file.is_absolute() {
                pathdiff::diff_paths(file, resources_dir)
                    .filter(|p| !p.starts_with(".."))
                    .ok_or_else(|| {
                        ChunkcodeError::Structural(format!(
                            "{} is outside {}",
                            file.display(),
                            resources_dir.display()
                        ))
                    })?
            } else {
                file.clone()
            };
            if !resources_dir.join(&relative).is_file() {
                return Err(ChunkcodeError::FileNotFound(resources_dir.join(&relative).display().to_string()));
            }
            requests.push(MetadataRequest::for_file(&relative));
        }

        tokio::fs::create_dir_all(output_dir).await?;
        let mapping = DirMapping::new(resources_dir, work_dir, work_dir, output_dir, work_dir);
        let job = JobRequest::ComputeMetrics {
            metrics_params: MetricsParams {
                metadata: Some(requests),
                ..Default::default()
            },
        };

        info!("Obtaining video metadata");
        let result = self.dispatch(&job, &self.environment(mapping)).await?;

        if result.data.len() < files.len() {
            return Err(ChunkcodeError::Structural(
                "Failed to obtain video metadata. Missing output for at least one input file.".to_string(),
            ));
        }
        if result.data.len() > files.len() {
            return Err(ChunkcodeError::Structural(
                "Failed to obtain video metadata. Too many results.".to_string(),
            ));
        }

        Ok(result.data)
    }
}
