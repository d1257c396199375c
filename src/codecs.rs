//! Catalog of the codecs and containers a transcoding task may request,
//! and which codecs each container is able to hold.

use std::fmt::Display;

use crate::error::{ChunkcodeError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    Av1,
    Flv1,
    H263,
    H264,
    H265,
    Hevc,
    Mjpeg,
    Mpeg1,
    Mpeg2,
    Mpeg4,
    Theora,
    Vp8,
    Vp9,
    Wmv1,
    Wmv2,
}

impl VideoCodec {
    pub const ALL: [VideoCodec; 15] = [
        VideoCodec::Av1,
        VideoCodec::Flv1,
        VideoCodec::H263,
        VideoCodec::H264,
        VideoCodec::H265,
        VideoCodec::Hevc,
        VideoCodec::Mjpeg,
        VideoCodec::Mpeg1,
        VideoCodec::Mpeg2,
        VideoCodec::Mpeg4,
        VideoCodec::Theora,
        VideoCodec::Vp8,
        VideoCodec::Vp9,
        VideoCodec::Wmv1,
        VideoCodec::Wmv2,
    ];

    /// Wire name, as used in job parameters and reported by ffprobe.
    pub fn name(&self) -> &'static str {
        match self {
            VideoCodec::Av1 => "av1",
            VideoCodec::Flv1 => "flv1",
            VideoCodec::H263 => "h263",
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Hevc => "hevc",
            VideoCodec::Mjpeg => "mjpeg",
            VideoCodec::Mpeg1 => "mpeg1video",
            VideoCodec::Mpeg2 => "mpeg2video",
            VideoCodec::Mpeg4 => "mpeg4",
            VideoCodec::Theora => "theora",
            VideoCodec::Vp8 => "vp8",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Wmv1 => "wmv1",
            VideoCodec::Wmv2 => "wmv2",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|codec| codec.name() == name)
            .ok_or_else(|| ChunkcodeError::UnsupportedCodec(name.to_string()))
    }

    /// Name ffprobe reports for a stream encoded with this codec.
    pub fn probe_name(&self) -> &'static str {
        match self {
            VideoCodec::H265 => "hevc",
            other => other.name(),
        }
    }
}

impl Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    Aac,
    Ac3,
    AmrNb,
    Mp2,
    Mp3,
    Opus,
    PcmU8,
    Wmav2,
    Vorbis,
}

impl AudioCodec {
    pub const ALL: [AudioCodec; 9] = [
        AudioCodec::Aac,
        AudioCodec::Ac3,
        AudioCodec::AmrNb,
        AudioCodec::Mp2,
        AudioCodec::Mp3,
        AudioCodec::Opus,
        AudioCodec::PcmU8,
        AudioCodec::Wmav2,
        AudioCodec::Vorbis,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Ac3 => "ac3",
            AudioCodec::AmrNb => "amr_nb",
            AudioCodec::Mp2 => "mp2",
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Opus => "opus",
            AudioCodec::PcmU8 => "pcm_u8",
            AudioCodec::Wmav2 => "wmav2",
            AudioCodec::Vorbis => "vorbis",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|codec| codec.name() == name)
            .ok_or_else(|| ChunkcodeError::UnsupportedCodec(name.to_string()))
    }
}

impl Display for AudioCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A logical codec name resolved against both catalogs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Video(VideoCodec),
    Audio(AudioCodec),
}

pub fn codec_from_name(name: &str) -> Result<Codec> {
    if let Ok(codec) = VideoCodec::from_name(name) {
        return Ok(Codec::Video(codec));
    }
    AudioCodec::from_name(name).map(Codec::Audio)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Container {
    Asf,
    Flv,
    M4v,
    Mov,
    Mp4,
    Mpeg,
    Mpg,
    Mts,
    Avi,
    Mkv,
    Ogv,
    Ts,
    Vob,
    Webm,
    Wmv,
    X3gp,
}

use AudioCodec as A;
use VideoCodec as V;

// Codec sets shared by most general-purpose containers. H.263 is left out
// because only a handful of resolutions are encodable.
const GENERAL_VIDEO: &[VideoCodec] = &[
    V::Flv1,
    V::H264,
    V::Hevc,
    V::Mjpeg,
    V::Mpeg1,
    V::Mpeg2,
    V::Mpeg4,
    V::Theora,
    V::Vp8,
    V::Vp9,
    V::Wmv1,
    V::Wmv2,
];

// ffmpeg rejects the HEVC codec parameters inside ASF.
const ASF_VIDEO: &[VideoCodec] = &[
    V::Flv1,
    V::H264,
    V::Mjpeg,
    V::Mpeg1,
    V::Mpeg2,
    V::Mpeg4,
    V::Theora,
    V::Vp8,
    V::Vp9,
    V::Wmv1,
    V::Wmv2,
];

const MOV_VIDEO: &[VideoCodec] = &[
    V::Flv1,
    V::H264,
    V::Hevc,
    V::Mjpeg,
    V::Mpeg1,
    V::Mpeg2,
    V::Mpeg4,
    V::Theora,
    V::Wmv1,
    V::Wmv2,
];

const MP4_VIDEO: &[VideoCodec] = &[
    V::H264,
    V::Hevc,
    V::Mjpeg,
    V::Mpeg1,
    V::Mpeg2,
    V::Mpeg4,
    V::Vp9,
];

impl Container {
    pub const ALL: [Container; 16] = [
        Container::Asf,
        Container::Flv,
        Container::M4v,
        Container::Mov,
        Container::Mp4,
        Container::Mpeg,
        Container::Mpg,
        Container::Mts,
        Container::Avi,
        Container::Mkv,
        Container::Ogv,
        Container::Ts,
        Container::Vob,
        Container::Webm,
        Container::Wmv,
        Container::X3gp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Container::Asf => "asf",
            Container::Flv => "flv",
            Container::M4v => "m4v",
            Container::Mov => "mov",
            Container::Mp4 => "mp4",
            Container::Mpeg => "mpeg",
            Container::Mpg => "mpg",
            Container::Mts => "mts",
            Container::Avi => "avi",
            Container::Mkv => "mkv",
            Container::Ogv => "ogv",
            Container::Ts => "ts",
            Container::Vob => "vob",
            Container::Webm => "webm",
            Container::Wmv => "wmv",
            Container::X3gp => "3gp",
        }
    }

    /// Container names are matched case-insensitively (`MP4` == `mp4`).
    pub fn from_name(name: &str) -> Result<Self> {
        let normalized = name.to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|container| container.name() == normalized)
            .ok_or_else(|| ChunkcodeError::UnsupportedContainer(name.to_string()))
    }

    /// File extension, including the leading dot.
    pub fn extension(&self) -> String {
        format!(".{}", self.name())
    }

    pub fn supported_video_codecs(&self) -> &'static [VideoCodec] {
        match self {
            Container::Avi
            | Container::Mkv
            | Container::Mpeg
            | Container::Mpg
            | Container::Mts
            | Container::Ts
            | Container::Vob => GENERAL_VIDEO,
            Container::Asf | Container::Wmv => ASF_VIDEO,
            Container::Mov => MOV_VIDEO,
            Container::Mp4 => MP4_VIDEO,
            Container::Flv => &[V::Flv1, V::H264],
            Container::M4v => &[V::H264, V::Mpeg4],
            Container::Ogv => &[V::Theora, V::Vp8],
            Container::Webm => &[V::Vp8, V::Vp9],
            Container::X3gp => &[V::H264, V::Mpeg4],
        }
    }

    pub fn supported_audio_codecs(&self) -> &'static [AudioCodec] {
        match self {
            Container::Avi | Container::Mp4 | Container::Asf | Container::Flv | Container::Ts => {
                &[A::Aac, A::Mp3]
            }
            Container::Mkv => &[A::Aac, A::Mp3, A::Vorbis],
            Container::M4v | Container::Mts => &[A::Aac, A::Ac3, A::Mp3],
            Container::Mov => &[A::Aac, A::Mp3, A::PcmU8],
            Container::Mpeg | Container::Mpg | Container::Vob => &[A::Aac, A::Mp2, A::Mp3],
            Container::Ogv | Container::Webm => &[A::Opus, A::Vorbis],
            Container::Wmv => &[A::Aac, A::Mp3, A::Wmav2],
            Container::X3gp => &[A::Aac, A::AmrNb],
        }
    }

    pub fn supports_video(&self, codec: VideoCodec) -> bool {
        self.supported_video_codecs().contains(&codec)
    }

    pub fn supports_audio(&self, codec: AudioCodec) -> bool {
        self.supported_audio_codecs().contains(&codec)
    }
}

impl Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Check the compatibility matrix once at startup. A failure here is a
/// programming error in the tables above, never a user error.
pub fn check_catalog() -> Result<()> {
    for container in Container::ALL {
        let video = container.supported_video_codecs();
        let audio = container.supported_audio_codecs();

        if video.is_empty() || audio.is_empty() {
            return Err(ChunkcodeError::Config(format!(
                "Container {} has an empty codec compatibility entry",
                container
            )));
        }

        if let Some(codec) = video.iter().find(|c| !VideoCodec::ALL.contains(c)) {
            return Err(ChunkcodeError::Config(format!(
                "Container {} lists unknown video codec {}",
                container, codec
            )));
        }

        if let Some(codec) = audio.iter().find(|c| !AudioCodec::ALL.contains(c)) {
            return Err(ChunkcodeError::Config(format!(
                "Container {} lists unknown audio codec {}",
                container, codec
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_closed() {
        assert!(check_catalog().is_ok());
        for container in Container::ALL {
            for codec in container.supported_video_codecs() {
                assert!(VideoCodec::ALL.contains(codec));
            }
            for codec in container.supported_audio_codecs() {
                assert!(AudioCodec::ALL.contains(codec));
            }
        }
    }

    #[test]
    fn test_names_round_trip_through_lookup() {
        for codec in VideoCodec::ALL {
            assert_eq!(VideoCodec::from_name(codec.name()).unwrap(), codec);
        }
        for codec in AudioCodec::ALL {
            assert_eq!(AudioCodec::from_name(codec.name()).unwrap(), codec);
        }
    }

    #[test]
    fn test_container_lookup_is_case_insensitive() {
        assert_eq!(Container::from_name("MP4").unwrap(), Container::Mp4);
        assert_eq!(Container::from_name("3GP").unwrap(), Container::X3gp);
        assert_eq!(Container::Mkv.extension(), ".mkv");
    }

    #[test]
    fn test_unknown_names_are_rejected_with_the_name() {
        match VideoCodec::from_name("abcd") {
            Err(ChunkcodeError::UnsupportedCodec(name)) => assert_eq!(name, "abcd"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            Container::from_name("xyz"),
            Err(ChunkcodeError::UnsupportedContainer(_))
        ));
        // Codec names stay case sensitive.
        assert!(VideoCodec::from_name("H264").is_err());
    }

    #[test]
    fn test_codec_from_name_checks_both_catalogs() {
        assert_eq!(codec_from_name("vp9").unwrap(), Codec::Video(VideoCodec::Vp9));
        assert_eq!(codec_from_name("opus").unwrap(), Codec::Audio(AudioCodec::Opus));
        assert!(codec_from_name("pcm_s16le").is_err());
    }

    #[test]
    fn test_compatibility_matrix_samples() {
        assert!(Container::Mp4.supports_video(VideoCodec::H264));
        assert!(!Container::Mp4.supports_video(VideoCodec::Vp8));
        assert!(!Container::Wmv.supports_video(VideoCodec::Hevc));
        assert!(!Container::Mkv.supports_video(VideoCodec::H263));
        assert!(Container::Webm.supports_audio(AudioCodec::Opus));
        assert!(!Container::Webm.supports_audio(AudioCodec::Aac));
        assert!(Container::X3gp.supports_audio(AudioCodec::AmrNb));
    }
}
