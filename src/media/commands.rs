use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ChunkcodeError, Result};
use crate::protocol::{StreamType, TranscodeArgs};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Never read from stdin; jobs run unattended
    pub fn no_stdin(self) -> Self {
        self.arg("-nostdin")
    }

    /// Add a `-map` stream selector
    pub fn map<S: Into<String>>(self, selector: S) -> Self {
        self.arg("-map").arg(selector)
    }

    /// Copy every selected stream without re-encoding
    pub fn copy_all(self) -> Self {
        self.arg("-codec").arg("copy")
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    pub fn video_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:v").arg(bitrate)
    }

    pub fn audio_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    pub fn frame_rate<S: Into<String>>(self, rate: S) -> Self {
        self.arg("-r").arg(rate)
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    fn command(&self) -> Command {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let mut cmd = Command::new(&self.binary_path);
        cmd.args(&self.args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn run(&self) -> Result<std::process::Output> {
        let output = self
            .command()
            .output()
            .await
            .map_err(|e| ChunkcodeError::Sandbox(format!("Failed to execute {}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ChunkcodeError::Sandbox(format!(
                "{} failed ({}): {}",
                self.description, output.status, stderr
            )));
        }

        Ok(output)
    }

    /// Execute the command
    pub async fn execute(&self) -> Result<()> {
        self.run().await.map(|_| ())
    }

    /// Execute the command and return everything it printed
    pub async fn execute_to_string(&self) -> Result<String> {
        let output = self.run().await?;
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    /// Execute the command and store its standard output in `path`
    pub async fn execute_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let output = self.run().await?;
        tokio::fs::write(path, &output.stdout).await?;
        Ok(())
    }
}

/// Encoder used for a logical video codec name. Unknown names pass through.
pub fn video_encoder(codec: &str) -> String {
    match codec {
        "h264" => "libx264",
        "h265" | "hevc" => "libx265",
        "mpeg1video" => "mpeg1video",
        "mpeg2video" => "mpeg2video",
        "mpeg4" => "libxvid",
        other => other,
    }
    .to_string()
}

/// Encoder used for a logical audio codec name. Unknown names pass through.
pub fn audio_encoder(codec: &str) -> String {
    match codec {
        "aac" => "aac",
        "mp3" => "libmp3lame",
        other => other,
    }
    .to_string()
}

/// Builder for the ffmpeg / ffprobe invocations behind each sandbox command
#[derive(Debug, Clone)]
pub struct MediaCommandBuilder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S1: Into<String>, S2: Into<String>>(ffmpeg_path: S1, ffprobe_path: S2) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    fn ffmpeg<S: Into<String>>(&self, description: S) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, description).no_stdin()
    }

    /// Copy the selected streams into a new container of the same type.
    ///
    /// Selectors are prefixed with `0:`, so `["v"]` keeps every video stream
    /// and `["v", "a:2"]` adds the third audio stream.
    pub fn extract_streams(
        &self,
        input_file: &Path,
        output_file: &Path,
        selected_streams: &[String],
    ) -> MediaCommand {
        let mut cmd = self.ffmpeg("Stream extraction").input(input_file);
        for selector in selected_streams {
            cmd = cmd.map(format!("0:{}", selector));
        }
        cmd.copy_all().output(output_file)
    }

    /// Cut `input_file` into segments of `segment_time` seconds. ffmpeg snaps
    /// the cuts to keyframes, so the segment count is only approximate.
    pub fn split_segments(
        &self,
        input_file: &Path,
        list_file: &Path,
        segment_pattern: &Path,
        segment_time: f64,
    ) -> MediaCommand {
        self.ffmpeg("Video splitting")
            .input(input_file)
            .copy_all()
            .args(["-f", "segment", "-reset_timestamps", "1"])
            .arg("-segment_time")
            .arg(segment_time.to_string())
            .args(["-segment_list_type", "m3u8"])
            .arg("-segment_list")
            .arg(list_file.to_string_lossy().to_string())
            .output(segment_pattern)
    }

    pub fn transcode(&self, track: &Path, output_file: &Path, targs: &TranscodeArgs) -> MediaCommand {
        let mut cmd = self.ffmpeg("Chunk transcoding").input(track);

        let video = targs.video.as_ref();
        let audio = targs.audio.as_ref();

        if let Some(codec) = video.and_then(|v| v.codec.as_deref()) {
            cmd = cmd.video_codec(video_encoder(codec));
        }
        if let Some(rate) = &targs.frame_rate {
            cmd = cmd.frame_rate(rate.clone());
        }
        if let Some(bitrate) = video.and_then(|v| v.bitrate.as_deref()) {
            cmd = cmd.video_bitrate(bitrate);
        }
        if let Some(codec) = audio.and_then(|a| a.codec.as_deref()) {
            cmd = cmd.audio_codec(audio_encoder(codec));
        }
        if let Some(bitrate) = audio.and_then(|a| a.bitrate.as_deref()) {
            cmd = cmd.audio_bitrate(bitrate);
        }
        if let Some([width, height]) = targs.resolution {
            cmd = cmd.video_filter(format!("scale={}:{}", width, height));
        }
        if let Some(alg) = &targs.scaling_alg {
            cmd = cmd.arg("-sws_flags").arg(alg.clone());
        }

        cmd.output(output_file)
    }

    /// Concatenate the files listed in an ffconcat manifest.
    pub fn concat(&self, list_file: &Path, output_file: &Path) -> MediaCommand {
        self.ffmpeg("Chunk merging")
            .args(["-f", "concat", "-safe", "0"])
            .input(list_file)
            .arg("-c")
            .arg("copy")
            .output(output_file)
    }

    /// Map every stream of input 0 except those of `stream_type`, which are
    /// taken from input 1 instead.
    pub fn replace_streams(
        &self,
        input_file: &Path,
        replacement_source: &Path,
        output_file: &Path,
        stream_type: StreamType,
    ) -> MediaCommand {
        let selector = stream_type.selector();
        self.ffmpeg("Stream replacement")
            .input(input_file)
            .input(replacement_source)
            .map(format!("1:{}", selector))
            .map("0")
            .map(format!("-0:{}", selector))
            .arg("-copy_unknown")
            .copy_all()
            .output(output_file)
    }

    pub fn psnr(&self, video: &Path, reference: &Path, frames_file: &Path) -> MediaCommand {
        self.quality_metric("psnr", video, reference, frames_file)
    }

    pub fn ssim(&self, video: &Path, reference: &Path, frames_file: &Path) -> MediaCommand {
        self.quality_metric("ssim", video, reference, frames_file)
    }

    fn quality_metric(&self, filter: &str, video: &Path, reference: &Path, frames_file: &Path) -> MediaCommand {
        self.ffmpeg(format!("{} computation", filter.to_uppercase()))
            .input(video)
            .input(reference)
            .arg("-lavfi")
            .arg(format!("{}={}", filter, frames_file.display()))
            .args(["-f", "null", "-"])
    }

    /// Container and stream metadata as JSON on stdout.
    pub fn probe(&self, video: &Path) -> MediaCommand {
        MediaCommand::new(&self.ffprobe_path, "Metadata probe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .output(video)
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "Version check").arg("-version")
    }
}
