//! End-to-end runs of the workflow against a scripted sandbox that fakes
//! every ffmpeg product on the host.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chunkcode::config::Config;
use chunkcode::error::{ChunkcodeError, Result};
use chunkcode::media::{collect_output_files, JobEnvironment, SandboxRunner};
use chunkcode::protocol::{JobRequest, JobResult, SplitResults, SplitSegment, StreamType, SPLIT_RESULTS_FILE};
use chunkcode::task::TaskDefinition;
use chunkcode::verify::{DiffRecord, REASON_NO_MATCHING_STREAM};
use chunkcode::workflow::{TaskState, Workflow};

const ORIGINAL_CONTENT: &str = "original";
const TRANSCODED_CONTENT: &str = "transcoded";
const MERGED_CONTENT: &str = "merged";

const ORIGINAL_PROBE: &str = r#"{
    "format": {"duration": "60.000", "start_time": "0.000", "nb_programs": 0},
    "streams": [
        {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
         "pix_fmt": "yuv420p", "r_frame_rate": "25/1", "start_time": "0.000",
         "duration": "60.000", "bit_rate": "4500000", "nb_frames": "1500"},
        {"codec_type": "audio", "codec_name": "aac", "sample_rate": "48000", "sample_fmt": "fltp",
         "channels": 2, "channel_layout": "stereo", "start_time": "0.000",
         "duration": "60.000", "bit_rate": "128000", "nb_frames": "2813"},
        {"codec_type": "subtitle", "codec_name": "subrip", "start_time": "0.000", "tags": {"language": "eng"}}
    ]
}"#;

// Streams reordered, codec and resolution changed as requested, a new video
// bitrate nobody asked for, timing jitter.
const TRANSCODED_PROBE: &str = r#"{
    "format": {"duration": "60.480", "start_time": "0.000", "nb_programs": 0},
    "streams": [
        {"codec_type": "audio", "codec_name": "aac", "sample_rate": "48000", "sample_fmt": "fltp",
         "channels": 2, "channel_layout": "stereo", "start_time": "0.000",
         "duration": "60.010", "bit_rate": "127000", "nb_frames": "2813"},
        {"codec_type": "subtitle", "codec_name": "subrip", "start_time": "0.000", "tags": {"language": "eng"}},
        {"codec_type": "video", "codec_name": "hevc", "width": 1280, "height": 720,
         "pix_fmt": "yuv420p", "r_frame_rate": "25/1", "start_time": "0.020",
         "duration": "60.040", "bit_rate": "1000000", "nb_frames": "1500"}
    ]
}"#;

// Same codec, smaller frame, lower bitrate.
const RESIZED_PROBE: &str = r#"{
    "format": {"duration": "60.000", "start_time": "0.000", "nb_programs": 0},
    "streams": [
        {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720,
         "pix_fmt": "yuv420p", "r_frame_rate": "25/1", "start_time": "0.000",
         "duration": "60.000", "bit_rate": "450000", "nb_frames": "1500"},
        {"codec_type": "audio", "codec_name": "aac", "sample_rate": "48000", "sample_fmt": "fltp",
         "channels": 2, "channel_layout": "stereo", "start_time": "0.000",
         "duration": "60.000", "bit_rate": "128000", "nb_frames": "2813"},
        {"codec_type": "subtitle", "codec_name": "subrip", "start_time": "0.000", "tags": {"language": "eng"}}
    ]
}"#;

// The audio track lost frames on the way through.
const TRUNCATED_AUDIO_PROBE: &str = r#"{
    "format": {"duration": "60.000", "start_time": "0.000", "nb_programs": 0},
    "streams": [
        {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720,
         "pix_fmt": "yuv420p", "r_frame_rate": "25/1", "start_time": "0.000",
         "duration": "60.000", "bit_rate": "450000", "nb_frames": "1500"},
        {"codec_type": "audio", "codec_name": "aac", "sample_rate": "48000", "sample_fmt": "fltp",
         "channels": 2, "channel_layout": "stereo", "start_time": "0.000",
         "duration": "30.000", "bit_rate": "128000", "nb_frames": "1406"},
        {"codec_type": "subtitle", "codec_name": "subrip", "start_time": "0.000", "tags": {"language": "eng"}}
    ]
}"#;

const TRANSCODED_PROBE_WITHOUT_SUBTITLES: &str = r#"{
    "format": {"duration": "60.000", "start_time": "0.000", "nb_programs": 0},
    "streams": [
        {"codec_type": "video", "codec_name": "hevc", "width": 1280, "height": 720,
         "pix_fmt": "yuv420p", "r_frame_rate": "25/1", "start_time": "0.000",
         "duration": "60.000", "bit_rate": "1000000", "nb_frames": "1500"},
        {"codec_type": "audio", "codec_name": "aac", "sample_rate": "48000", "sample_fmt": "fltp",
         "channels": 2, "channel_layout": "stereo", "start_time": "0.000",
         "duration": "60.000", "bit_rate": "128000", "nb_frames": "2813"}
    ]
}"#;

/// Plays the sandbox side of every job on host paths.
struct ScriptedSandbox {
    transcoded_probe: &'static str,
    failing_chunk: Option<usize>,
    merged: Mutex<Vec<PathBuf>>,
    replaced: Mutex<Option<JobRequest>>,
}

impl ScriptedSandbox {
    fn new(transcoded_probe: &'static str) -> Self {
        Self {
            transcoded_probe,
            failing_chunk: None,
            merged: Mutex::new(Vec::new()),
            replaced: Mutex::new(None),
        }
    }
}

fn chunk_number(path: &Path) -> usize {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('_').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl SandboxRunner for ScriptedSandbox {
    async fn run(&self, job: &JobRequest, env: &JobEnvironment) -> Result<JobResult> {
        env.dirs.ensure_exists().await?;

        match job {
            JobRequest::Extract { output_file, .. } => {
                std::fs::write(output_file, "video only")?;
            }
            JobRequest::Split { path_to_stream, parts } => {
                // One segment more than requested: the count is advisory.
                let stem = path_to_stream.file_stem().unwrap().to_string_lossy().to_string();
                let mut segments = Vec::new();
                for i in 0..=*parts as usize {
                    let name = format!("{}_{}.mkv", stem, i);
                    std::fs::write(env.dirs.output.join(&name), format!("segment {}", i))?;
                    segments.push(SplitSegment {
                        video_segment: PathBuf::from("/golem/output").join(name),
                        playlist: None,
                    });
                }
                let results = SplitResults {
                    main_list: PathBuf::from("/golem/output/main.m3u8"),
                    segments,
                    status: None,
                };
                std::fs::write(env.dirs.output.join(SPLIT_RESULTS_FILE), serde_json::to_string(&results)?)?;
            }
            JobRequest::Transcode { track, output_stream, .. } => {
                assert!(track.is_file(), "chunk {} was not staged", track.display());
                let number = chunk_number(track);
                if self.failing_chunk == Some(number) {
                    return Err(ChunkcodeError::Sandbox(format!("Transcoding chunk {} failed", number)));
                }
                // Later chunks finish first.
                tokio::time::sleep(Duration::from_millis((10 - number as u64) * 5)).await;
                std::fs::write(output_stream, format!("chunk {}", number))?;
            }
            JobRequest::Merge { chunks, output_stream } => {
                *self.merged.lock().unwrap() = chunks.clone();
                std::fs::write(output_stream, MERGED_CONTENT)?;
            }
            JobRequest::Replace { input_file, replacement_source, output_file, .. } => {
                assert_eq!(std::fs::read_to_string(input_file)?, ORIGINAL_CONTENT);
                assert_eq!(std::fs::read_to_string(replacement_source)?, MERGED_CONTENT);
                *self.replaced.lock().unwrap() = Some(job.clone());
                std::fs::write(output_file, TRANSCODED_CONTENT)?;
            }
            JobRequest::ComputeMetrics { metrics_params } => {
                for request in metrics_params.metadata.iter().flatten() {
                    let content = std::fs::read_to_string(env.dirs.resources.join(&request.video))?;
                    let document = if content == TRANSCODED_CONTENT {
                        self.transcoded_probe
                    } else {
                        ORIGINAL_PROBE
                    };
                    std::fs::write(env.dirs.output.join(&request.output), document)?;
                }
            }
            other => panic!("unexpected job {}", other.command_name()),
        }

        Ok(collect_output_files(&env.dirs.output))
    }

    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct Fixture {
    root: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("movie.mkv"), ORIGINAL_CONTENT).unwrap();
        Self { root }
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.pipeline.work_root = self.root.path().join("tasks");
        config.pipeline.max_parallel_jobs = 2;
        config
    }

    fn definition(&self) -> TaskDefinition {
        TaskDefinition {
            input: self.root.path().join("movie.mkv"),
            output: self.root.path().join("out").join("movie.mkv"),
            codec: Some("hevc".to_string()),
            resolution: Some([1280, 720]),
            subtasks_count: 4,
            ..Default::default()
        }
    }

    fn task_dir(&self, task_id: &uuid::Uuid) -> PathBuf {
        self.root.path().join("tasks").join(task_id.to_string())
    }
}

#[tokio::test]
async fn test_full_task_produces_equivalent_output() {
    let fixture = Fixture::new();
    let sandbox = Arc::new(ScriptedSandbox::new(TRANSCODED_PROBE));
    let workflow = Workflow::with_runner(fixture.config(), sandbox.clone());

    let report = workflow.run(&fixture.definition()).await.unwrap();

    assert_eq!(report.state, TaskState::Finished);
    assert_eq!(report.chunk_count, 5);
    assert_eq!(report.diff, Some(vec![]));
    assert!(report.is_success());

    let output = fixture.root.path().join("out").join("movie.mkv");
    assert_eq!(report.output.as_deref(), Some(output.as_path()));
    assert_eq!(std::fs::read_to_string(&output).unwrap(), TRANSCODED_CONTENT);
    assert!(!fixture.task_dir(&report.task_id).exists());
}

#[tokio::test]
async fn test_replace_takes_video_from_merge_and_the_rest_from_input() {
    let fixture = Fixture::new();
    let sandbox = Arc::new(ScriptedSandbox::new(TRANSCODED_PROBE));
    let workflow = Workflow::with_runner(fixture.config(), sandbox.clone());

    let report = workflow.run(&fixture.definition()).await.unwrap();
    assert!(report.is_success());

    match sandbox.replaced.lock().unwrap().clone() {
        Some(JobRequest::Replace { input_file, replacement_source, stream_type, .. }) => {
            assert_eq!(input_file, std::fs::canonicalize(fixture.root.path().join("movie.mkv")).unwrap());
            assert_eq!(replacement_source.file_name().unwrap(), "movie[video-only].mkv");
            assert_eq!(stream_type, StreamType::Video);
        }
        other => panic!("expected a replace job, got {:?}", other),
    }
}

#[tokio::test]
async fn test_resize_without_bitrate_verifies_clean() {
    let fixture = Fixture::new();
    let sandbox = Arc::new(ScriptedSandbox::new(RESIZED_PROBE));
    let workflow = Workflow::with_runner(fixture.config(), sandbox);

    let definition = TaskDefinition {
        codec: None,
        output: fixture.root.path().join("out").join("movie.mp4"),
        ..fixture.definition()
    };
    let report = workflow.run(&definition).await.unwrap();

    assert_eq!(report.state, TaskState::Finished);
    assert_eq!(report.diff, Some(vec![]));
    assert!(report.is_success());
}

#[tokio::test]
async fn test_shortened_audio_is_reported() {
    let fixture = Fixture::new();
    let sandbox = Arc::new(ScriptedSandbox::new(TRUNCATED_AUDIO_PROBE));
    let workflow = Workflow::with_runner(fixture.config(), sandbox);

    let definition = TaskDefinition { codec: None, ..fixture.definition() };
    let report = workflow.run(&definition).await.unwrap();

    assert!(!report.is_success());
    let attributes: Vec<String> = report
        .diff
        .unwrap()
        .iter()
        .filter(|r| r.location() == "audio")
        .filter_map(|r| match r {
            DiffRecord::Attribute { attribute, .. } => Some(attribute.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(attributes, vec!["duration".to_string(), "frame_count".to_string()]);
}

#[tokio::test]
async fn test_chunks_are_merged_in_split_order() {
    let fixture = Fixture::new();
    let sandbox = Arc::new(ScriptedSandbox::new(TRANSCODED_PROBE));
    let workflow = Workflow::with_runner(fixture.config(), sandbox.clone());

    let report = workflow.run(&fixture.definition()).await.unwrap();
    assert_eq!(report.state, TaskState::Finished);

    let merged = sandbox.merged.lock().unwrap().clone();
    let names: Vec<String> = merged
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    let expected: Vec<String> = (0..5).map(|i| format!("movie[video-only]_{}_TC.mkv", i)).collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn test_dropped_stream_is_reported() {
    let fixture = Fixture::new();
    let sandbox = Arc::new(ScriptedSandbox::new(TRANSCODED_PROBE_WITHOUT_SUBTITLES));
    let workflow = Workflow::with_runner(fixture.config(), sandbox);

    let report = workflow.run(&fixture.definition()).await.unwrap();

    assert_eq!(report.state, TaskState::Finished);
    assert!(!report.is_success());
    let records = report.diff.unwrap();
    assert!(records.iter().any(|r| r.location() == "subtitle" && r.reason() == REASON_NO_MATCHING_STREAM));
    assert!(records.iter().any(|r| r.location() == "format"));
}

#[tokio::test]
async fn test_failed_chunk_fails_the_task() {
    let fixture = Fixture::new();
    let mut sandbox = ScriptedSandbox::new(TRANSCODED_PROBE);
    sandbox.failing_chunk = Some(2);
    let sandbox = Arc::new(sandbox);

    let mut config = fixture.config();
    config.pipeline.keep_work_dirs = true;
    let workflow = Workflow::with_runner(config, sandbox.clone());

    let report = workflow.run(&fixture.definition()).await.unwrap();

    assert!(matches!(&report.state, TaskState::Failed(reason) if reason.contains("chunk 2")));
    assert!(report.diff.is_none());
    assert!(sandbox.merged.lock().unwrap().is_empty());
    assert!(!fixture.root.path().join("out").join("movie.mkv").exists());
    assert!(fixture.task_dir(&report.task_id).exists());
}

#[tokio::test]
async fn test_existing_output_is_refused() {
    let fixture = Fixture::new();
    let definition = fixture.definition();
    std::fs::create_dir_all(definition.output.parent().unwrap()).unwrap();
    std::fs::write(&definition.output, "keep me").unwrap();

    let workflow = Workflow::with_runner(fixture.config(), Arc::new(ScriptedSandbox::new(TRANSCODED_PROBE)));
    let err = workflow.run(&definition).await.unwrap_err();

    assert!(matches!(err, ChunkcodeError::OutputExists(_)));
    assert_eq!(std::fs::read_to_string(&definition.output).unwrap(), "keep me");
}

#[test]
fn test_probe_single_file() {
    let fixture = Fixture::new();
    let workflow = Workflow::with_runner(fixture.config(), Arc::new(ScriptedSandbox::new(TRANSCODED_PROBE)));

    let report = tokio_test::block_on(workflow.probe(&fixture.root.path().join("movie.mkv"))).unwrap();

    assert_eq!(report.streams().len(), 3);
    // The scratch directory does not outlive the probe.
    let leftovers = std::fs::read_dir(fixture.root.path().join("tasks")).unwrap().count();
    assert_eq!(leftovers, 0);
}
