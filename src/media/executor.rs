//! The dispatcher that runs inside the sandbox.
//!
//! It maps one [`JobRequest`] onto ffmpeg / ffprobe invocations and leaves
//! its products in the output directory. Paths in the request are taken as
//! seen from inside the sandbox.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use super::commands::MediaCommandBuilder;
use super::manifest::{common_directory, render_concat_manifest, sort_transcoded_chunks};
use crate::error::{ChunkcodeError, Result};
use crate::protocol::{
    video_only_name, JobRequest, MetadataRequest, MetricsParams, QualityMetricRequest, SplitResults,
    SplitSegment, StreamType, TranscodeArgs, CONCAT_LIST_BASENAME, SPLIT_RESULTS_FILE,
    SPLIT_STATUS_SUCCESS,
};

/// Directory layout as seen by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDirs {
    pub resources: PathBuf,
    pub work: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ProbeFormatOnly {
    format: ProbeFormatDuration,
}

#[derive(Debug, Deserialize)]
struct ProbeFormatDuration {
    duration: Option<String>,
}

pub struct JobExecutor {
    builder: MediaCommandBuilder,
}

impl JobExecutor {
    pub fn new(builder: MediaCommandBuilder) -> Self {
        Self { builder }
    }

    pub async fn execute(&self, job: &JobRequest, dirs: &JobDirs) -> Result<()> {
        info!("Executing sandbox command: {}", job.command_name());

        match job {
            JobRequest::Extract { input_file, output_file, selected_streams } => {
                self.extract(input_file, output_file, selected_streams).await
            }
            JobRequest::Split { path_to_stream, parts } => {
                self.split(path_to_stream, *parts, dirs).await
            }
            JobRequest::ExtractAndSplit { input_file, parts } => {
                let intermediate = dirs.work.join(video_only_name(input_file));
                self.extract(input_file, &intermediate, &["v".to_string()]).await?;
                self.split(&intermediate, *parts, dirs).await
            }
            JobRequest::Transcode { track, targs, output_stream } => {
                self.transcode(track, targs, output_stream).await
            }
            JobRequest::Merge { chunks, output_stream } => self.merge(chunks, output_stream).await,
            JobRequest::Replace { input_file, replacement_source, output_file, stream_type } => {
                self.replace(input_file, replacement_source, output_file, *stream_type).await
            }
            JobRequest::MergeAndReplace { input_file, chunks, output_file } => {
                let intermediate = dirs.work.join(video_only_name(output_file));
                self.merge(chunks, &intermediate).await?;
                self.replace(input_file, &intermediate, output_file, StreamType::Video).await
            }
            JobRequest::ComputeMetrics { metrics_params } => {
                self.compute_metrics(metrics_params, dirs).await
            }
        }
    }

    async fn extract(&self, input_file: &Path, output_file: &Path, selected_streams: &[String]) -> Result<()> {
        require_input(input_file)?;
        require_absent(output_file)?;
        self.builder
            .extract_streams(input_file, output_file, selected_streams)
            .execute()
            .await
    }

    async fn split(&self, path_to_stream: &Path, parts: u32, dirs: &JobDirs) -> Result<()> {
        require_input(path_to_stream)?;
        if parts == 0 {
            return Err(ChunkcodeError::Config("Cannot split a video into 0 parts".to_string()));
        }

        let duration = self.video_duration(path_to_stream).await?;
        let segment_time = duration / parts as f64;

        let stem = path_to_stream
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = path_to_stream
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        fs::create_dir_all(&dirs.output).await?;
        let list_file = dirs.output.join(format!("{}_.m3u8", stem));
        let pattern = dirs.output.join(format!("{}_%d{}", stem, extension));

        debug!(
            "Splitting {} ({}s) into segments of {}s",
            path_to_stream.display(),
            duration,
            segment_time
        );
        self.builder
            .split_segments(path_to_stream, &list_file, &pattern, segment_time)
            .execute()
            .await?;

        let listing = fs::read_to_string(&list_file).await?;
        let segments = parse_segment_list(&listing, &dirs.output)
            .into_iter()
            .map(|video_segment| SplitSegment { video_segment, playlist: None })
            .collect();

        let results = SplitResults {
            main_list: list_file,
            segments,
            status: Some(SPLIT_STATUS_SUCCESS.to_string()),
        };
        fs::write(dirs.output.join(SPLIT_RESULTS_FILE), serde_json::to_string(&results)?).await?;
        Ok(())
    }

    async fn video_duration(&self, path: &Path) -> Result<f64> {
        let raw = self.builder.probe(path).execute_to_string().await?;
        let probe: ProbeFormatOnly = serde_json::from_str(&raw)?;
        probe
            .format
            .duration
            .and_then(|d| d.parse::<f64>().ok())
            .ok_or_else(|| {
                ChunkcodeError::Structural(format!("Cannot determine duration of {}", path.display()))
            })
    }

    async fn transcode(&self, track: &Path, targs: &TranscodeArgs, output_stream: &Path) -> Result<()> {
        require_input(track)?;
        require_absent(output_stream)?;
        self.builder.transcode(track, output_stream, targs).execute().await
    }

    async fn merge(&self, chunks: &[PathBuf], output_stream: &Path) -> Result<()> {
        require_absent(output_stream)?;
        let directory = common_directory(chunks)?;

        let extension = output_stream
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let ordered = sort_transcoded_chunks(chunks, &extension);
        if ordered.is_empty() {
            return Err(ChunkcodeError::Structural(format!(
                "None of the {} chunks is a transcoded {} file",
                chunks.len(),
                extension
            )));
        }

        // The concat demuxer resolves entries relative to the manifest.
        let list_file = directory.join(CONCAT_LIST_BASENAME);
        fs::write(&list_file, render_concat_manifest(&ordered)).await?;

        self.builder.concat(&list_file, output_stream).execute().await
    }

    async fn replace(
        &self,
        input_file: &Path,
        replacement_source: &Path,
        output_file: &Path,
        stream_type: StreamType,
    ) -> Result<()> {
        require_input(input_file)?;
        require_input(replacement_source)?;
        require_absent(output_file)?;
        self.builder
            .replace_streams(input_file, replacement_source, output_file, stream_type)
            .execute()
            .await
    }

    async fn compute_metrics(&self, params: &MetricsParams, dirs: &JobDirs) -> Result<()> {
        if let Some(request) = &params.ssim {
            self.quality_metric("SSIM", request, dirs).await?;
        }
        if let Some(request) = &params.psnr {
            self.quality_metric("PSNR", request, dirs).await?;
        }
        for request in params.metadata.iter().flatten() {
            self.metadata(request, dirs).await?;
        }
        Ok(())
    }

    async fn quality_metric(&self, metric: &str, request: &QualityMetricRequest, dirs: &JobDirs) -> Result<()> {
        let video = dirs.resources.join(&request.video);
        let reference = dirs.resources.join(&request.reference);
        let frames_file = dirs.output.join(&request.output);
        let log_file = dirs.output.join(&request.log);
        require_input(&video)?;
        require_input(&reference)?;

        let command = match metric {
            "SSIM" => self.builder.ssim(&video, &reference, &frames_file),
            _ => self.builder.psnr(&video, &reference, &frames_file),
        };
        let printed = command.execute_to_string().await?;
        fs::write(&log_file, filter_metric_lines(&printed, metric)).await?;
        Ok(())
    }

    async fn metadata(&self, request: &MetadataRequest, dirs: &JobDirs) -> Result<()> {
        let video = dirs.resources.join(&request.video);
        require_input(&video)?;
        self.builder
            .probe(&video)
            .execute_to_file(dirs.output.join(&request.output))
            .await
    }
}

fn require_input(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ChunkcodeError::FileNotFound(path.display().to_string()))
    }
}

fn require_absent(path: &Path) -> Result<()> {
    if path.exists() {
        Err(ChunkcodeError::OutputExists(path.display().to_string()))
    } else {
        Ok(())
    }
}

/// Segment paths from an m3u8 segment list, resolved against `base`.
pub fn parse_segment_list(listing: &str, base: &Path) -> Vec<PathBuf> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| base.join(line))
        .collect()
}

fn filter_metric_lines(printed: &str, metric: &str) -> String {
    printed
        .lines()
        .filter(|line| line.contains(metric))
        .map(|line| format!("{}\n", line))
        .collect()
}
