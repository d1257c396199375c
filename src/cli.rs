use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcode a video chunk by chunk and verify the result
    Transcode {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file; its extension selects the container
        #[arg(short, long)]
        output: PathBuf,

        /// Target video codec (e.g. h264, hevc, vp9)
        #[arg(long)]
        codec: Option<String>,

        /// Target audio codec
        #[arg(long)]
        audio_codec: Option<String>,

        /// Target resolution as WIDTHxHEIGHT
        #[arg(long, value_parser = parse_resolution)]
        resolution: Option<[u32; 2]>,

        /// Target video bitrate (e.g. 1M)
        #[arg(long)]
        bitrate: Option<String>,

        /// Target audio bitrate (e.g. 128k)
        #[arg(long)]
        audio_bitrate: Option<String>,

        /// Target frame rate (e.g. 25 or 30000/1001)
        #[arg(long)]
        frame_rate: Option<String>,

        /// Scaling algorithm passed to -sws_flags
        #[arg(long)]
        scaling_alg: Option<String>,

        /// Container, when it should not follow the output extension
        #[arg(long)]
        container: Option<String>,

        /// Requested number of chunks; the split may produce a different count
        #[arg(short, long, default_value_t = 4)]
        parts: u32,

        /// Skip the structural comparison of input and output
        #[arg(long)]
        no_verify: bool,
    },

    /// Print the metadata report of a video file
    Probe {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compare two stored ffprobe JSON documents
    Diff {
        /// Probe document of the original file
        #[arg(long)]
        original: PathBuf,

        /// Probe document of the modified file
        #[arg(long)]
        modified: PathBuf,
    },

    /// Execute one sandbox job from a parameter file
    ExecJob {
        /// Job parameters (JSON)
        #[arg(long)]
        params: PathBuf,

        /// Resources directory
        #[arg(long, default_value = "/golem/resources")]
        resources: PathBuf,

        /// Work directory
        #[arg(long, default_value = "/golem/work")]
        work: PathBuf,

        /// Output directory
        #[arg(long, default_value = "/golem/output")]
        output: PathBuf,
    },

    /// List containers and the codecs each one accepts
    Containers,
}

/// `1920x1080` -> `[1920, 1080]`
pub fn parse_resolution(raw: &str) -> Result<[u32; 2], String> {
    let (width, height) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("Invalid resolution '{}', expected WIDTHxHEIGHT", raw))?;
    let width = width.trim().parse().map_err(|_| format!("Invalid width in '{}'", raw))?;
    let height = height.trim().parse().map_err(|_| format!("Invalid height in '{}'", raw))?;
    Ok([width, height])
}
