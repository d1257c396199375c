//! Normalized view of an ffprobe document.
//!
//! Every report kind exposes an ordered attribute table: a list of
//! `(name, accessor)` pairs walked by the diff engine.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::Path;

use super::fuzzy::{parse_frame_rate, AttributeValue, FuzzyDuration};
use crate::error::{ChunkcodeError, Result};

/// Whole-file duration jitter accepted after a re-encode.
pub const FORMAT_DURATION_TOLERANCE: f64 = 10.0;
/// Per-stream duration and start time jitter.
pub const STREAM_TIME_TOLERANCE: f64 = 0.05;
pub const BITRATE_TOLERANCE_PERCENT: u32 = 5;

type Accessor<T> = fn(&T) -> AttributeValue;

#[derive(Debug, Clone, Default, Deserialize)]
struct RawProbe {
    #[serde(default)]
    format: RawFormat,
    #[serde(default)]
    streams: Vec<RawStream>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawFormat {
    duration: Option<String>,
    start_time: Option<String>,
    nb_programs: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    start_time: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    nb_frames: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    sample_rate: Option<String>,
    sample_fmt: Option<String>,
    channels: Option<i64>,
    channel_layout: Option<String>,
    #[serde(default)]
    tags: RawTags,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawTags {
    language: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Data,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle, StreamKind::Data];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Subtitle => "subtitle",
            StreamKind::Data => "data",
        }
    }

    pub fn from_codec_type(codec_type: &str) -> Result<Self> {
        match codec_type {
            "video" => Ok(StreamKind::Video),
            "audio" => Ok(StreamKind::Audio),
            "subtitle" => Ok(StreamKind::Subtitle),
            "data" => Ok(StreamKind::Data),
            other => Err(ChunkcodeError::UnsupportedCodecType(other.to_string())),
        }
    }
}

impl Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamCommon {
    pub codec_name: Option<String>,
    pub start_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoStream {
    pub common: StreamCommon,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pixel_format: Option<String>,
    pub frame_rate: Option<String>,
    pub duration: Option<String>,
    pub bitrate: Option<String>,
    pub frame_count: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioStream {
    pub common: StreamCommon,
    pub sample_rate: Option<String>,
    pub sample_format: Option<String>,
    pub channel_count: Option<i64>,
    pub channel_layout: Option<String>,
    pub duration: Option<String>,
    pub bitrate: Option<String>,
    pub frame_count: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleStream {
    pub common: StreamCommon,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataStream {
    pub common: StreamCommon,
}

fn codec_name(common: &StreamCommon) -> AttributeValue {
    AttributeValue::text(common.codec_name.as_deref())
}

fn start_time(common: &StreamCommon) -> AttributeValue {
    AttributeValue::duration(common.start_time.as_deref(), STREAM_TIME_TOLERANCE)
}

const VIDEO_ATTRIBUTES: &[(&str, Accessor<VideoStream>)] = &[
    ("codec_name", |s| codec_name(&s.common)),
    ("start_time", |s| start_time(&s.common)),
    ("duration", |s| AttributeValue::duration(s.duration.as_deref(), STREAM_TIME_TOLERANCE)),
    ("resolution", |s| match (s.width, s.height) {
        (Some(w), Some(h)) => AttributeValue::Resolution(w, h),
        _ => AttributeValue::Missing,
    }),
    ("pixel_format", |s| AttributeValue::text(s.pixel_format.as_deref())),
    ("frame_rate", |s| match s.frame_rate.as_deref() {
        None => AttributeValue::Missing,
        Some(raw) => parse_frame_rate(raw)
            .map(|rate| AttributeValue::Duration(FuzzyDuration::new(rate, 0.0)))
            .unwrap_or_else(|| AttributeValue::Text(raw.to_string())),
    }),
    ("bitrate", |s| AttributeValue::fuzzy_int(s.bitrate.as_deref(), BITRATE_TOLERANCE_PERCENT)),
    ("frame_count", |s| AttributeValue::text(s.frame_count.as_deref())),
];

const AUDIO_ATTRIBUTES: &[(&str, Accessor<AudioStream>)] = &[
    ("codec_name", |s| codec_name(&s.common)),
    ("start_time", |s| start_time(&s.common)),
    ("duration", |s| AttributeValue::duration(s.duration.as_deref(), STREAM_TIME_TOLERANCE)),
    ("sample_rate", |s| AttributeValue::text(s.sample_rate.as_deref())),
    ("sample_format", |s| AttributeValue::text(s.sample_format.as_deref())),
    ("channel_count", |s| AttributeValue::int(s.channel_count)),
    ("channel_layout", |s| AttributeValue::text(s.channel_layout.as_deref())),
    ("bitrate", |s| AttributeValue::fuzzy_int(s.bitrate.as_deref(), BITRATE_TOLERANCE_PERCENT)),
    ("frame_count", |s| AttributeValue::text(s.frame_count.as_deref())),
];

const SUBTITLE_ATTRIBUTES: &[(&str, Accessor<SubtitleStream>)] = &[
    ("codec_name", |s| codec_name(&s.common)),
    ("start_time", |s| start_time(&s.common)),
    ("language", |s| AttributeValue::text(s.language.as_deref())),
];

const DATA_ATTRIBUTES: &[(&str, Accessor<DataStream>)] = &[
    ("codec_name", |s| codec_name(&s.common)),
    ("start_time", |s| start_time(&s.common)),
];

fn walk<T>(table: &[(&'static str, Accessor<T>)], stream: &T) -> Vec<(&'static str, AttributeValue)> {
    table.iter().map(|(name, accessor)| (*name, accessor(stream))).collect()
}

/// One stream, classified by its `codec_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamReport {
    Video(VideoStream),
    Audio(AudioStream),
    Subtitle(SubtitleStream),
    Data(DataStream),
}

impl StreamReport {
    fn classify(raw: RawStream) -> Result<Self> {
        let codec_type = raw
            .codec_type
            .as_deref()
            .ok_or_else(|| ChunkcodeError::UnsupportedCodecType("<missing>".to_string()))?;
        let kind = StreamKind::from_codec_type(codec_type)?;
        let common = StreamCommon {
            codec_name: raw.codec_name,
            start_time: raw.start_time,
        };

        Ok(match kind {
            StreamKind::Video => StreamReport::Video(VideoStream {
                common,
                width: raw.width,
                height: raw.height,
                pixel_format: raw.pix_fmt,
                frame_rate: raw.r_frame_rate,
                duration: raw.duration,
                bitrate: raw.bit_rate,
                frame_count: raw.nb_frames,
            }),
            StreamKind::Audio => StreamReport::Audio(AudioStream {
                common,
                sample_rate: raw.sample_rate,
                sample_format: raw.sample_fmt,
                channel_count: raw.channels,
                channel_layout: raw.channel_layout,
                duration: raw.duration,
                bitrate: raw.bit_rate,
                frame_count: raw.nb_frames,
            }),
            StreamKind::Subtitle => StreamReport::Subtitle(SubtitleStream {
                common,
                language: raw.tags.language,
            }),
            StreamKind::Data => StreamReport::Data(DataStream { common }),
        })
    }

    pub fn kind(&self) -> StreamKind {
        match self {
            StreamReport::Video(_) => StreamKind::Video,
            StreamReport::Audio(_) => StreamKind::Audio,
            StreamReport::Subtitle(_) => StreamKind::Subtitle,
            StreamReport::Data(_) => StreamKind::Data,
        }
    }

    /// Compared attributes, in table order.
    pub fn attributes(&self) -> Vec<(&'static str, AttributeValue)> {
        match self {
            StreamReport::Video(s) => walk(VIDEO_ATTRIBUTES, s),
            StreamReport::Audio(s) => walk(AUDIO_ATTRIBUTES, s),
            StreamReport::Subtitle(s) => walk(SUBTITLE_ATTRIBUTES, s),
            StreamReport::Data(s) => walk(DATA_ATTRIBUTES, s),
        }
    }
}

/// Container-level attributes plus the classified streams of one file.
///
/// Two reports are equal when their diff is empty.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    duration: Option<String>,
    start_time: Option<String>,
    program_count: Option<i64>,
    streams: Vec<StreamReport>,
}

const FORMAT_ATTRIBUTES: &[(&str, Accessor<ProbeReport>)] = &[
    ("stream_types", |r| AttributeValue::Histogram(r.stream_types())),
    ("duration", |r| AttributeValue::duration(r.duration.as_deref(), FORMAT_DURATION_TOLERANCE)),
    ("start_time", |r| AttributeValue::duration(r.start_time.as_deref(), STREAM_TIME_TOLERANCE)),
    ("program_count", |r| AttributeValue::int(r.program_count)),
];

impl ProbeReport {
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawProbe = serde_json::from_str(content)?;
        let streams = raw
            .streams
            .into_iter()
            .map(StreamReport::classify)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            duration: raw.format.duration,
            start_time: raw.format.start_time,
            program_count: raw.format.nb_programs,
            streams,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn streams(&self) -> &[StreamReport] {
        &self.streams
    }

    /// Streams of one kind, in file order.
    pub fn streams_of(&self, kind: StreamKind) -> Vec<&StreamReport> {
        self.streams.iter().filter(|s| s.kind() == kind).collect()
    }

    /// codec_type -> number of streams
    pub fn stream_types(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for stream in &self.streams {
            *counts.entry(stream.kind().as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn format_attributes(&self) -> Vec<(&'static str, AttributeValue)> {
        walk(FORMAT_ATTRIBUTES, self)
    }
}
