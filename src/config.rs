use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{ChunkcodeError, Result};

fn default_job_timeout_secs() -> u64 {
    120
}

fn default_verify_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// Local: run ffmpeg directly on the host, inside the task directories
    Local,
    /// Container: run every job in a throwaway container with bind mounts
    Container,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Which runner executes the jobs
    pub runner: RunnerKind,
    /// Path to ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    pub ffprobe_path: String,
    /// Container runtime CLI (docker, podman)
    pub container_binary: String,
    /// Image providing ffmpeg and the chunkcode binary
    pub image: String,
    /// Program invoked inside the image for `exec-job`
    pub sandbox_entrypoint: String,
    /// Budget for a single job
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runner: RunnerKind::Local,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            container_binary: "docker".to_string(),
            image: "chunkcode/ffmpeg:1.0".to_string(),
            sandbox_entrypoint: "chunkcode".to_string(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

impl SandboxConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root under which every task gets its own directory
    pub work_root: PathBuf,
    /// Concurrent chunk transcodes, 0 means one per CPU
    pub max_parallel_jobs: usize,
    /// Keep task directories after a successful run
    pub keep_work_dirs: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from(".chunkcode/tasks"),
            max_parallel_jobs: 0,
            keep_work_dirs: false,
        }
    }
}

impl PipelineConfig {
    pub fn worker_count(&self) -> usize {
        if self.max_parallel_jobs == 0 {
            num_cpus::get().max(1)
        } else {
            self.max_parallel_jobs
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Probe both files after the run and diff them
    #[serde(default = "default_verify_enabled")]
    pub enabled: bool,
    /// Attributes missing on either side are not reported
    pub treat_missing_as_unchanged: bool,
    /// Stream kind (video, audio, subtitle, data) -> attributes left out of the diff
    pub exclude: HashMap<String, Vec<String>>,
}

impl Default for VerifyConfig {
    /// Video pixel format and audio codec are left out, and attributes
    /// missing on either side count as unchanged.
    fn default() -> Self {
        let mut exclude = HashMap::new();
        exclude.insert("video".to_string(), vec!["pixel_format".to_string()]);
        exclude.insert("audio".to_string(), vec!["codec_name".to_string()]);
        Self {
            enabled: default_verify_enabled(),
            treat_missing_as_unchanged: true,
            exclude,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChunkcodeError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| ChunkcodeError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ChunkcodeError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ChunkcodeError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}
