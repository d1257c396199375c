//! chunkcode - chunked video transcoding
//!
//! Entry point for the CLI: full transcoding tasks, one-off probes and
//! diffs, and `exec-job`, the command run inside the sandbox.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chunkcode::cli::{Args, Commands};
use chunkcode::codecs::{check_catalog, Container};
use chunkcode::config::Config;
use chunkcode::media::{collect_output_files, JobDirs, JobExecutor, MediaCommandBuilder};
use chunkcode::protocol::JobRequest;
use chunkcode::task::TaskDefinition;
use chunkcode::verify::{diff, DiffOptions, ProbeReport};
use chunkcode::workflow::Workflow;

const DEFAULT_CONFIG_FILE: &str = "chunkcode.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    // Inside the sandbox only the work directory is guaranteed to be writable
    let log_dir = match &args.command {
        Commands::ExecJob { work, .. } => work.join("log"),
        _ => config.pipeline.work_root.join("log"),
    };
    setup_logging(args.verbose, &log_dir)?;

    // A broken compatibility table is a build defect; refuse to run at all
    check_catalog()?;

    match args.command {
        Commands::Transcode {
            input,
            output,
            codec,
            audio_codec,
            resolution,
            bitrate,
            audio_bitrate,
            frame_rate,
            scaling_alg,
            container,
            parts,
            no_verify,
        } => {
            info!("Transcoding {} -> {}", input.display(), output.display());
            if no_verify {
                config.verify.enabled = false;
            }

            let definition = TaskDefinition {
                input,
                output,
                codec,
                audio_codec,
                resolution,
                bitrate,
                audio_bitrate,
                frame_rate,
                scaling_alg,
                container,
                subtasks_count: parts,
            };

            let workflow = Workflow::new(config).await?.with_progress(chunk_progress_bar()?);
            let report = workflow.run(&definition).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.is_success() {
                anyhow::bail!("Task {} did not produce an equivalent output", report.task_id);
            }
        }
        Commands::Probe { input } => {
            let workflow = Workflow::new(config).await?;
            let report = workflow.probe(&input).await?;
            println!("{}", serde_json::to_string_pretty(&report_to_json(&report))?);
        }
        Commands::Diff { original, modified } => {
            let original = ProbeReport::from_file(&original)?;
            let modified = ProbeReport::from_file(&modified)?;
            let options = DiffOptions::from_config(&config.verify)?;

            let records = diff(&original, &modified, &options);
            println!("{}", serde_json::to_string_pretty(&records)?);
            if !records.is_empty() {
                anyhow::bail!("Reports differ in {} places", records.len());
            }
        }
        Commands::ExecJob { params, resources, work, output } => {
            let content = std::fs::read_to_string(&params)?;
            let job = JobRequest::from_json(&content)?;
            info!("Executing {} job from {}", job.command_name(), params.display());

            let builder = MediaCommandBuilder::new(&config.sandbox.ffmpeg_path, &config.sandbox.ffprobe_path);
            let dirs = JobDirs { resources, work, output: output.clone() };
            JobExecutor::new(builder).execute(&job, &dirs).await?;

            println!("{}", serde_json::to_string(&collect_output_files(&output))?);
        }
        Commands::Containers => {
            println!("{:<8} {:<70} {:<30}", "Name", "Video codecs", "Audio codecs");
            println!("{}", "-".repeat(110));
            for container in Container::ALL {
                let video: Vec<&str> = container.supported_video_codecs().iter().map(|c| c.name()).collect();
                let audio: Vec<&str> = container.supported_audio_codecs().iter().map(|c| c.name()).collect();
                println!("{:<8} {:<70} {:<30}", container.name(), video.join(","), audio.join(","));
            }
        }
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(log_dir, "chunkcode.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console goes to stderr; stdout carries JSON results
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("chunkcode.log").display()
    );

    Ok(())
}

fn chunk_progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Attribute tables of a probe report as JSON.
fn report_to_json(report: &ProbeReport) -> serde_json::Value {
    let format: serde_json::Map<String, serde_json::Value> = report
        .format_attributes()
        .into_iter()
        .map(|(name, value)| (name.to_string(), serde_json::to_value(value).unwrap_or_default()))
        .collect();

    let streams: Vec<serde_json::Value> = report
        .streams()
        .iter()
        .map(|stream| {
            let mut attributes: serde_json::Map<String, serde_json::Value> = stream
                .attributes()
                .into_iter()
                .map(|(name, value)| (name.to_string(), serde_json::to_value(value).unwrap_or_default()))
                .collect();
            attributes.insert("codec_type".to_string(), stream.kind().as_str().into());
            serde_json::Value::Object(attributes)
        })
        .collect();

    serde_json::json!({ "format": format, "streams": streams })
}
