//! Parameter records exchanged with the sandbox.
//!
//! Every job is a flat JSON document keyed by a `command` discriminator,
//! e.g. `{"command": "split", "path_to_stream": "...", "parts": 4}`.
//! The sandbox answers with a [`JobResult`] listing the files it produced.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ChunkcodeError, Result};

/// File written by the split command into the output directory.
pub const SPLIT_RESULTS_FILE: &str = "split-results.json";

/// File name the job parameters are stored under inside the work directory.
pub const PARAMS_FILE: &str = "params.json";

/// Marks the intermediate container holding only the video streams.
pub const VIDEO_ONLY_SUFFIX: &str = "[video-only]";

/// Appended to a chunk stem once it has been transcoded.
pub const TRANSCODED_SUFFIX: &str = "_TC";

/// Concat manifest written next to the chunks during a merge.
pub const CONCAT_LIST_BASENAME: &str = "merge-input.ffconcat";

pub const SPLIT_STATUS_SUCCESS: &str = "Success";

const COMMANDS: [&str; 8] = [
    "extract",
    "split",
    "extract-and-split",
    "transcode",
    "merge",
    "replace",
    "merge-and-replace",
    "compute-metrics",
];

/// One unit of sandboxed work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum JobRequest {
    /// Copy the selected streams (`0:<selector>`) into a new container.
    Extract {
        input_file: PathBuf,
        output_file: PathBuf,
        selected_streams: Vec<String>,
    },
    /// Cut a stream into roughly `parts` segments of equal duration.
    Split { path_to_stream: PathBuf, parts: u32 },
    ExtractAndSplit { input_file: PathBuf, parts: u32 },
    Transcode {
        track: PathBuf,
        targs: TranscodeArgs,
        output_stream: PathBuf,
    },
    /// Concatenate transcoded chunks in index order.
    Merge {
        chunks: Vec<PathBuf>,
        output_stream: PathBuf,
    },
    /// Swap the streams of `stream_type` in `input_file` for those of
    /// `replacement_source`, keeping everything else.
    Replace {
        input_file: PathBuf,
        replacement_source: PathBuf,
        output_file: PathBuf,
        stream_type: StreamType,
    },
    MergeAndReplace {
        input_file: PathBuf,
        chunks: Vec<PathBuf>,
        output_file: PathBuf,
    },
    ComputeMetrics { metrics_params: MetricsParams },
}

impl JobRequest {
    /// Parse a parameter record, rejecting unknown discriminators with
    /// [`ChunkcodeError::InvalidCommand`] before looking at any other field.
    pub fn from_json(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        let command = value
            .get("command")
            .and_then(|c| c.as_str())
            .ok_or_else(|| ChunkcodeError::InvalidCommand("<missing>".to_string()))?;

        if !COMMANDS.contains(&command) {
            return Err(ChunkcodeError::InvalidCommand(command.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn command_name(&self) -> &'static str {
        match self {
            JobRequest::Extract { .. } => "extract",
            JobRequest::Split { .. } => "split",
            JobRequest::ExtractAndSplit { .. } => "extract-and-split",
            JobRequest::Transcode { .. } => "transcode",
            JobRequest::Merge { .. } => "merge",
            JobRequest::Replace { .. } => "replace",
            JobRequest::MergeAndReplace { .. } => "merge-and-replace",
            JobRequest::ComputeMetrics { .. } => "compute-metrics",
        }
    }

    /// Rewrite every path the job references. Container runners use this
    /// to move a request into the sandbox namespace.
    pub fn map_paths<F>(&self, mut f: F) -> JobRequest
    where
        F: FnMut(&Path) -> PathBuf,
    {
        match self.clone() {
            JobRequest::Extract { input_file, output_file, selected_streams } => JobRequest::Extract {
                input_file: f(&input_file),
                output_file: f(&output_file),
                selected_streams,
            },
            JobRequest::Split { path_to_stream, parts } => JobRequest::Split {
                path_to_stream: f(&path_to_stream),
                parts,
            },
            JobRequest::ExtractAndSplit { input_file, parts } => JobRequest::ExtractAndSplit {
                input_file: f(&input_file),
                parts,
            },
            JobRequest::Transcode { track, targs, output_stream } => JobRequest::Transcode {
                track: f(&track),
                targs,
                output_stream: f(&output_stream),
            },
            JobRequest::Merge { chunks, output_stream } => JobRequest::Merge {
                chunks: chunks.iter().map(|c| f(c)).collect(),
                output_stream: f(&output_stream),
            },
            JobRequest::Replace { input_file, replacement_source, output_file, stream_type } => {
                JobRequest::Replace {
                    input_file: f(&input_file),
                    replacement_source: f(&replacement_source),
                    output_file: f(&output_file),
                    stream_type,
                }
            }
            JobRequest::MergeAndReplace { input_file, chunks, output_file } => {
                JobRequest::MergeAndReplace {
                    input_file: f(&input_file),
                    chunks: chunks.iter().map(|c| f(c)).collect(),
                    output_file: f(&output_file),
                }
            }
            // Metric paths are already relative to the resources/output dirs.
            request @ JobRequest::ComputeMetrics { .. } => request,
        }
    }
}

/// Stream selector accepted by the replace command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamType {
    #[serde(rename = "v")]
    Video,
    /// Video streams that are not attached pictures or cover art.
    #[serde(rename = "V")]
    VideoNoPictures,
    #[serde(rename = "a")]
    Audio,
    #[serde(rename = "s")]
    Subtitle,
    #[serde(rename = "d")]
    Data,
    #[serde(rename = "t")]
    Attachment,
}

impl StreamType {
    pub fn selector(&self) -> &'static str {
        match self {
            StreamType::Video => "v",
            StreamType::VideoNoPictures => "V",
            StreamType::Audio => "a",
            StreamType::Subtitle => "s",
            StreamType::Data => "d",
            StreamType::Attachment => "t",
        }
    }
}

/// Target parameters for one transcode job. Every field is optional and an
/// absent field means the corresponding ffmpeg flag is not passed at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<StreamArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<StreamArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling_alg: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
}

impl StreamArgs {
    /// `None` when neither field is set, so empty sections are dropped.
    pub fn new(codec: Option<String>, bitrate: Option<String>) -> Option<Self> {
        if codec.is_none() && bitrate.is_none() {
            None
        } else {
            Some(Self { codec, bitrate })
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssim: Option<QualityMetricRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psnr: Option<QualityMetricRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<MetadataRequest>>,
}

/// `video` and `reference` are relative to the resources directory,
/// `output` and `log` to the output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetricRequest {
    pub video: PathBuf,
    pub reference: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRequest {
    pub video: PathBuf,
    pub output: PathBuf,
}

impl MetadataRequest {
    /// Probe request for a file in the resources directory; the report is
    /// written as `metadata-logs-{stem}.json`.
    pub fn for_file(video: &Path) -> Self {
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            video: video.to_path_buf(),
            output: PathBuf::from(format!("metadata-logs-{}.json", stem)),
        }
    }
}

/// What the sandbox hands back after a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub data: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Contents of [`SPLIT_RESULTS_FILE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitResults {
    pub main_list: PathBuf,
    #[serde(default)]
    pub segments: Vec<SplitSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl SplitResults {
    /// A missing status counts as success.
    pub fn is_success(&self) -> bool {
        self.status.as_deref().unwrap_or(SPLIT_STATUS_SUCCESS) == SPLIT_STATUS_SUCCESS
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSegment {
    pub video_segment: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist: Option<PathBuf>,
}

fn split_file_name(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, extension)
}

/// `movie.mkv` -> `movie[video-only].mkv`
pub fn video_only_name(path: &Path) -> String {
    let (stem, extension) = split_file_name(path);
    format!("{}{}{}", stem, VIDEO_ONLY_SUFFIX, extension)
}

/// `movie_3.mkv` + `.mp4` -> `movie_3_TC.mp4`
pub fn transcoded_chunk_name(chunk: &Path, output_extension: &str) -> String {
    let (stem, _) = split_file_name(chunk);
    format!("{}{}{}", stem, TRANSCODED_SUFFIX, output_extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_request_wire_format() {
        let job = JobRequest::Split {
            path_to_stream: PathBuf::from("/golem/tmp/movie[video-only].mkv"),
            parts: 4,
        };
        let value: serde_json::Value = serde_json::from_str(&job.to_json().unwrap()).unwrap();
        assert_eq!(value["command"], "split");
        assert_eq!(value["path_to_stream"], "/golem/tmp/movie[video-only].mkv");
        assert_eq!(value["parts"], 4);
    }

    #[test]
    fn test_compute_metrics_discriminator_is_kebab_case() {
        let job = JobRequest::ComputeMetrics {
            metrics_params: MetricsParams {
                metadata: Some(vec![MetadataRequest::for_file(Path::new("movie.mp4"))]),
                ..Default::default()
            },
        };
        let value: serde_json::Value = serde_json::from_str(&job.to_json().unwrap()).unwrap();
        assert_eq!(value["command"], "compute-metrics");
        assert_eq!(
            value["metrics_params"]["metadata"][0]["output"],
            "metadata-logs-movie.json"
        );
        assert!(value["metrics_params"].get("ssim").is_none());
    }

    #[test]
    fn test_omitted_transcode_args_are_not_serialized() {
        let targs = TranscodeArgs {
            video: StreamArgs::new(Some("h264".to_string()), None),
            audio: StreamArgs::new(None, None),
            ..Default::default()
        };
        let value = serde_json::to_value(&targs).unwrap();
        assert_eq!(value, serde_json::json!({"video": {"codec": "h264"}}));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let err = JobRequest::from_json(r#"{"command": "dance", "input_file": "a"}"#).unwrap_err();
        assert!(matches!(err, ChunkcodeError::InvalidCommand(ref c) if c == "dance"));

        let err = JobRequest::from_json(r#"{"input_file": "a"}"#).unwrap_err();
        assert!(matches!(err, ChunkcodeError::InvalidCommand(_)));
    }

    #[test]
    fn test_replace_request_parses_stream_type() {
        let job = JobRequest::from_json(
            r#"{"command": "replace", "input_file": "/in.mkv",
                "replacement_source": "/merged.mkv", "output_file": "/out.mkv",
                "stream_type": "v"}"#,
        )
        .unwrap();
        match job {
            JobRequest::Replace { stream_type, .. } => assert_eq!(stream_type, StreamType::Video),
            other => panic!("unexpected job: {:?}", other),
        }

        assert!(JobRequest::from_json(
            r#"{"command": "replace", "input_file": "/in.mkv",
                "replacement_source": "/merged.mkv", "output_file": "/out.mkv",
                "stream_type": "x"}"#,
        )
        .is_err());
    }

    #[test]
    fn test_split_status_defaults_to_success() {
        let results: SplitResults = serde_json::from_str(
            r#"{"main_list": "/golem/output/movie_.m3u8",
                "segments": [{"video_segment": "movie_0.mkv"}]}"#,
        )
        .unwrap();
        assert!(results.is_success());

        let failed = SplitResults { status: Some("Failure".to_string()), ..results };
        assert!(!failed.is_success());
    }

    #[test]
    fn test_derived_file_names() {
        assert_eq!(video_only_name(Path::new("/x/movie.mkv")), "movie[video-only].mkv");
        assert_eq!(
            transcoded_chunk_name(Path::new("/x/movie[video-only]_3.mkv"), ".mp4"),
            "movie[video-only]_3_TC.mp4"
        );
    }

    #[test]
    fn test_map_paths_leaves_selectors_alone() {
        let job = JobRequest::Extract {
            input_file: PathBuf::from("/host/in.mkv"),
            output_file: PathBuf::from("/host/out.mkv"),
            selected_streams: vec!["v".to_string()],
        };
        let mapped = job.map_paths(|p| Path::new("/golem").join(p.file_name().unwrap()));
        assert_eq!(
            mapped,
            JobRequest::Extract {
                input_file: PathBuf::from("/golem/in.mkv"),
                output_file: PathBuf::from("/golem/out.mkv"),
                selected_streams: vec!["v".to_string()],
            }
        );
    }
}
