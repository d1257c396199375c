use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::codecs::{AudioCodec, Container, VideoCodec};
use crate::error::{ChunkcodeError, Result};
use crate::protocol::{StreamArgs, TranscodeArgs};
use crate::verify::{parse_frame_rate, AttributeValue, DiffOptions, FuzzyDuration, StreamKind};

/// Accepted drift between a requested and a measured frame rate.
pub const FRAME_RATE_TOLERANCE: f64 = 0.5;

/// What the user asked for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub audio_codec: Option<String>,
    #[serde(default)]
    pub resolution: Option<[u32; 2]>,
    #[serde(default)]
    pub bitrate: Option<String>,
    #[serde(default)]
    pub audio_bitrate: Option<String>,
    #[serde(default)]
    pub frame_rate: Option<String>,
    #[serde(default)]
    pub scaling_alg: Option<String>,
    /// Defaults to the output file's extension
    #[serde(default)]
    pub container: Option<String>,
    pub subtasks_count: u32,
}

/// A validated task, ready to be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeTask {
    pub input: PathBuf,
    pub output: PathBuf,
    pub container: Container,
    pub video_codec: Option<VideoCodec>,
    pub audio_codec: Option<AudioCodec>,
    pub resolution: Option<[u32; 2]>,
    pub frame_rate: Option<String>,
    pub subtasks_count: u32,
    targs: TranscodeArgs,
}

impl TranscodeTask {
    /// Parameters shared by every chunk transcode job.
    pub fn transcode_args(&self) -> &TranscodeArgs {
        &self.targs
    }

    /// Extension of every transcoded chunk and of the final file.
    pub fn output_extension(&self) -> String {
        self.container.extension()
    }

    pub fn output_name(&self) -> Result<String> {
        self.output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ChunkcodeError::TaskBuild(format!("Invalid output path: {}", self.output.display())))
    }

    /// Verifier overrides for the changes this task asked for.
    pub fn expected_changes(&self, base: DiffOptions) -> DiffOptions {
        let mut options = base;
        if let Some(codec) = self.video_codec {
            options = options.with_stream_override(
                StreamKind::Video,
                "codec_name",
                AttributeValue::Text(codec.probe_name().to_string()),
            );
        }
        if let Some([width, height]) = self.resolution {
            options = options.with_stream_override(StreamKind::Video, "resolution", AttributeValue::Resolution(width, height));
        }
        if let Some(rate) = self.frame_rate.as_deref().and_then(parse_frame_rate) {
            options = options.with_stream_override(
                StreamKind::Video,
                "frame_rate",
                AttributeValue::Duration(FuzzyDuration::new(rate, FRAME_RATE_TOLERANCE)),
            );
        }

        // Every chunk is re-encoded, so the video bitrate moves even when no
        // video parameter was given. A new frame rate also moves the frame count.
        let video_exclude = options.stream_exclude.entry(StreamKind::Video).or_default();
        video_exclude.insert("bitrate".to_string());
        if self.frame_rate.is_some() {
            video_exclude.insert("frame_count".to_string());
        }
        if self.transcode_args().audio.as_ref().is_some_and(|a| a.bitrate.is_some()) {
            options.stream_exclude.entry(StreamKind::Audio).or_default().insert("bitrate".to_string());
        }
        options
    }
}

/// Validates a [`TaskDefinition`] against the codec catalog.
pub struct TaskBuilder;

impl TaskBuilder {
    /// Every rejection here happens before any sandboxed work starts.
    pub fn build(definition: &TaskDefinition) -> Result<TranscodeTask> {
        let container = match &definition.container {
            Some(name) => Container::from_name(name)?,
            None => Container::from_name(&extension_of(&definition.output)?)?,
        };

        let video_codec = definition
            .codec
            .as_deref()
            .map(VideoCodec::from_name)
            .transpose()?;
        if let Some(codec) = video_codec {
            if !container.supports_video(codec) {
                return Err(ChunkcodeError::VideoCodecNotSupportedByContainer {
                    codec: codec.to_string(),
                    container: container.to_string(),
                });
            }
        }

        let audio_codec = definition
            .audio_codec
            .as_deref()
            .map(AudioCodec::from_name)
            .transpose()?;
        if let Some(codec) = audio_codec {
            if !container.supports_audio(codec) {
                return Err(ChunkcodeError::AudioCodecNotSupportedByContainer {
                    codec: codec.to_string(),
                    container: container.to_string(),
                });
            }
        }

        if definition.subtasks_count == 0 {
            return Err(ChunkcodeError::TaskBuild("subtasks_count must be at least 1".to_string()));
        }
        if let Some([width, height]) = definition.resolution {
            if width == 0 || height == 0 {
                return Err(ChunkcodeError::TaskBuild(format!("Invalid resolution {}x{}", width, height)));
            }
        }
        if let Some(rate) = &definition.frame_rate {
            if parse_frame_rate(rate).is_none_or(|r| r <= 0.0) {
                return Err(ChunkcodeError::TaskBuild(format!("Invalid frame rate {}", rate)));
            }
        }

        let output_extension = extension_of(&definition.output)?;
        if !container.extension().eq_ignore_ascii_case(&format!(".{}", output_extension)) {
            return Err(ChunkcodeError::TaskBuild(format!(
                "Output {} does not match container {}",
                definition.output.display(),
                container
            )));
        }

        let targs = TranscodeArgs {
            video: StreamArgs::new(video_codec.map(|c| c.name().to_string()), definition.bitrate.clone()),
            audio: StreamArgs::new(
                audio_codec.map(|c| c.name().to_string()),
                definition.audio_bitrate.clone(),
            ),
            resolution: definition.resolution,
            frame_rate: definition.frame_rate.clone(),
            scaling_alg: definition.scaling_alg.clone(),
        };
        debug!("Built transcode args: {:?}", targs);

        Ok(TranscodeTask {
            input: definition.input.clone(),
            output: definition.output.clone(),
            container,
            video_codec,
            audio_codec,
            resolution: definition.resolution,
            frame_rate: definition.frame_rate.clone(),
            subtasks_count: definition.subtasks_count,
            targs,
        })
    }
}

fn extension_of(path: &Path) -> Result<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_string())
        .ok_or_else(|| ChunkcodeError::TaskBuild(format!("Cannot determine container of {}", path.display())))
}
