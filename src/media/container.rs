use async_trait::async_trait;
use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::commands::MediaCommand;
use super::{collect_output_files, JobEnvironment, SandboxRunner};
use crate::config::SandboxConfig;
use crate::error::{ChunkcodeError, Result};
use crate::protocol::{JobRequest, JobResult, PARAMS_FILE};

pub const RESOURCES_DIR: &str = "/golem/resources";
pub const TEMPORARY_DIR: &str = "/golem/tmp";
pub const WORK_DIR: &str = "/golem/work";
pub const OUTPUT_DIR: &str = "/golem/output";
pub const LOGS_DIR: &str = "/golem/logs";
const BINDS_DIR: &str = "/golem/binds";

#[derive(Debug, Clone, PartialEq)]
struct Mount {
    host: PathBuf,
    target: PathBuf,
    read_only: bool,
}

impl Mount {
    fn volume_spec(&self) -> String {
        let mut spec = format!("{}:{}", self.host.display(), self.target.display());
        if self.read_only {
            spec.push_str(":ro");
        }
        spec
    }
}

/// Kills a started container unless disarmed.
///
/// Dropping the `run` future only kills the local client process; the
/// container itself keeps running until someone stops it by name.
struct RunningContainer {
    binary: String,
    name: String,
    armed: bool,
}

impl RunningContainer {
    fn new(binary: &str, name: &str) -> Self {
        Self {
            binary: binary.to_string(),
            name: name.to_string(),
            armed: true,
        }
    }

    fn kill_command(&self) -> MediaCommand {
        MediaCommand::new(&self.binary, "Container kill")
            .arg("kill")
            .arg(&self.name)
    }

    /// The client returned, so the container is gone.
    fn disarm(mut self) {
        self.armed = false;
    }

    async fn kill(mut self) {
        self.armed = false;
        if let Err(e) = self.kill_command().execute().await {
            warn!("Failed to kill container {}: {}", self.name, e);
        }
    }
}

impl Drop for RunningContainer {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Job in container {} was abandoned, killing it", self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let kill = self.kill_command();
                let name = self.name.clone();
                handle.spawn(async move {
                    if let Err(e) = kill.execute().await {
                        warn!("Failed to kill container {}: {}", name, e);
                    }
                });
            }
            Err(_) => {
                let spawned = std::process::Command::new(&self.binary)
                    .arg("kill")
                    .arg(&self.name)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn();
                if let Err(e) = spawned {
                    warn!("Failed to kill container {}: {}", self.name, e);
                }
            }
        }
    }
}

/// Runs every job in a throwaway container with the task directories
/// bind-mounted under `/golem`.
///
/// The image must provide this crate's binary; the job is handed over as
/// `params.json` in the work directory and run through `exec-job`.
pub struct ContainerRunner {
    config: SandboxConfig,
}

impl ContainerRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn mounts(env: &JobEnvironment) -> Vec<Mount> {
        let dirs = &env.dirs;
        let mut mounts: Vec<Mount> = [
            (&dirs.resources, RESOURCES_DIR),
            (&dirs.temporary, TEMPORARY_DIR),
            (&dirs.work, WORK_DIR),
            (&dirs.output, OUTPUT_DIR),
            (&dirs.logs, LOGS_DIR),
        ]
        .into_iter()
        .map(|(host, target)| Mount {
            host: host.clone(),
            target: PathBuf::from(target),
            read_only: false,
        })
        .collect();

        for (index, bind) in env.binds.iter().enumerate() {
            let file_name = bind.file_name().map(PathBuf::from).unwrap_or_default();
            mounts.push(Mount {
                host: bind.clone(),
                target: Path::new(BINDS_DIR).join(index.to_string()).join(file_name),
                read_only: true,
            });
        }
        mounts
    }

    /// Path of `host_path` inside the container. The most specific mount
    /// wins, so nested task directories resolve correctly. Among mounts of
    /// the same host directory the first one listed wins.
    fn to_container_path(mounts: &[Mount], host_path: &Path) -> Option<PathBuf> {
        mounts
            .iter()
            .enumerate()
            .filter_map(|(index, m)| {
                let relative = host_path.strip_prefix(&m.host).ok()?;
                // Joining an empty path would leave a trailing separator.
                let mapped = if relative.as_os_str().is_empty() {
                    m.target.clone()
                } else {
                    m.target.join(relative)
                };
                Some((m.host.components().count(), Reverse(index), mapped))
            })
            .max_by_key(|(depth, index, _)| (*depth, *index))
            .map(|(_, _, path)| path)
    }

    fn translate(job: &JobRequest, mounts: &[Mount]) -> Result<JobRequest> {
        let mut unmapped: Option<PathBuf> = None;
        let translated = job.map_paths(|path| match Self::to_container_path(mounts, path) {
            Some(mapped) => mapped,
            None => {
                unmapped.get_or_insert_with(|| path.to_path_buf());
                path.to_path_buf()
            }
        });

        match unmapped {
            Some(path) => Err(ChunkcodeError::Sandbox(format!(
                "{} is not visible inside the sandbox",
                path.display()
            ))),
            None => Ok(translated),
        }
    }

    fn run_command(&self, mounts: &[Mount], container_name: &str) -> MediaCommand {
        let mut cmd = MediaCommand::new(&self.config.container_binary, "Sandboxed job")
            .args(["run", "--rm", "--network", "none"])
            .arg("--name")
            .arg(container_name)
            .arg("--workdir")
            .arg(WORK_DIR);
        for mount in mounts {
            cmd = cmd.arg("-v").arg(mount.volume_spec());
        }
        cmd.arg(&self.config.image)
            .arg(&self.config.sandbox_entrypoint)
            .arg("exec-job")
            .arg("--params")
            .arg(format!("{}/{}", WORK_DIR, PARAMS_FILE))
            .args(["--resources", RESOURCES_DIR, "--work", WORK_DIR, "--output", OUTPUT_DIR])
    }
}

#[async_trait]
impl SandboxRunner for ContainerRunner {
    async fn run(&self, job: &JobRequest, env: &JobEnvironment) -> Result<JobResult> {
        env.dirs.ensure_exists().await?;
        if let Some(missing) = env.binds.iter().find(|b| !b.is_file()) {
            return Err(ChunkcodeError::FileNotFound(missing.display().to_string()));
        }

        let mounts = Self::mounts(env);
        let translated = Self::translate(job, &mounts)?;
        tokio::fs::write(env.dirs.work.join(PARAMS_FILE), translated.to_json()?).await?;

        let container_name = format!("chunkcode-{}", Uuid::new_v4());
        let command = self.run_command(&mounts, &container_name);
        debug!("Sandbox params: {:?}", translated);

        let container = RunningContainer::new(&self.config.container_binary, &container_name);
        match tokio::time::timeout(env.timeout, command.execute_to_string()).await {
            Ok(result) => {
                container.disarm();
                result?;
            }
            Err(_) => {
                warn!("Job {} timed out, killing container {}", job.command_name(), container_name);
                container.kill().await;
                return Err(ChunkcodeError::Timeout {
                    description: format!("{} job", job.command_name()),
                    seconds: env.timeout.as_secs(),
                });
            }
        }

        Ok(collect_output_files(&env.dirs.output))
    }

    async fn check_availability(&self) -> Result<()> {
        MediaCommand::new(&self.config.container_binary, "Sandbox image check")
            .args(["image", "inspect"])
            .arg(&self.config.image)
            .execute()
            .await?;
        info!("Sandbox image {} is available", self.config.image);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "container"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::DirMapping;
    use crate::protocol::StreamType;
    use std::time::Duration;

    fn environment() -> JobEnvironment {
        let task = Path::new("/data/tasks/t1");
        let dirs = DirMapping::new(
            task,
            &task.join("merge/work"),
            &task.join("merge/work"),
            &task.join("merge/output"),
            &task.join("merge/output"),
        );
        JobEnvironment::new(dirs, Duration::from_secs(120)).with_bind("/videos/movie.mkv")
    }

    #[test]
    fn test_paths_map_to_the_most_specific_mount() {
        let mounts = ContainerRunner::mounts(&environment());
        assert_eq!(
            ContainerRunner::to_container_path(&mounts, Path::new("/data/tasks/t1/movie_0_TC.mkv")),
            Some(PathBuf::from("/golem/resources/movie_0_TC.mkv"))
        );
        assert_eq!(
            ContainerRunner::to_container_path(&mounts, Path::new("/data/tasks/t1/merge/output/out.mkv")),
            Some(PathBuf::from("/golem/output/out.mkv"))
        );
        assert_eq!(
            ContainerRunner::to_container_path(&mounts, Path::new("/videos/movie.mkv")),
            Some(PathBuf::from("/golem/binds/0/movie.mkv"))
        );
        assert_eq!(ContainerRunner::to_container_path(&mounts, Path::new("/etc/passwd")), None);
    }

    #[test]
    fn test_replace_job_is_translated() {
        let mounts = ContainerRunner::mounts(&environment());
        let job = JobRequest::Replace {
            input_file: PathBuf::from("/videos/movie.mkv"),
            replacement_source: PathBuf::from("/data/tasks/t1/merge/output/movie[video-only].mkv"),
            output_file: PathBuf::from("/data/tasks/t1/merge/output/movie.mkv"),
            stream_type: StreamType::Video,
        };
        assert_eq!(
            ContainerRunner::translate(&job, &mounts).unwrap(),
            JobRequest::Replace {
                input_file: PathBuf::from("/golem/binds/0/movie.mkv"),
                replacement_source: PathBuf::from("/golem/output/movie[video-only].mkv"),
                output_file: PathBuf::from("/golem/output/movie.mkv"),
                stream_type: StreamType::Video,
            }
        );
    }

    #[test]
    fn test_unmounted_paths_are_rejected() {
        let mounts = ContainerRunner::mounts(&environment());
        let job = JobRequest::Split { path_to_stream: PathBuf::from("/elsewhere/m.mkv"), parts: 2 };
        assert!(matches!(
            ContainerRunner::translate(&job, &mounts),
            Err(ChunkcodeError::Sandbox(_))
        ));
    }

    #[test]
    fn test_shared_host_directory_resolves_to_first_mount() {
        let mounts = ContainerRunner::mounts(&environment());
        // merge/output backs both the output and the logs mount
        assert_eq!(
            ContainerRunner::to_container_path(&mounts, Path::new("/data/tasks/t1/merge/output")),
            Some(PathBuf::from(OUTPUT_DIR))
        );
        assert_eq!(
            ContainerRunner::to_container_path(&mounts, Path::new("/data/tasks/t1/merge/work/list.txt")),
            Some(PathBuf::from("/golem/tmp/list.txt"))
        );
    }

    /// A stand-in container CLI that appends its arguments to `calls.log`
    /// and keeps `run` busy for `run_seconds`.
    #[cfg(unix)]
    fn fake_container_cli(root: &Path, run_seconds: u32) -> (SandboxConfig, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = root.join("calls.log");
        let script = root.join("fake-docker");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$@\" >> '{}'\nif [ \"$1\" = run ]; then sleep {}; fi\n",
                log.display(),
                run_seconds
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = SandboxConfig {
            container_binary: script.display().to_string(),
            ..Default::default()
        };
        (config, log)
    }

    #[cfg(unix)]
    fn split_job(root: &Path, timeout: Duration) -> (JobRequest, JobEnvironment) {
        let task = root.join("task");
        let dirs = DirMapping::new(
            &task.join("resources"),
            &task.join("tmp"),
            &task.join("tmp"),
            &task.join("output"),
            &task.join("tmp"),
        );
        let job = JobRequest::Split { path_to_stream: task.join("output/m.mkv"), parts: 2 };
        (job, JobEnvironment::new(dirs, timeout))
    }

    #[cfg(unix)]
    async fn wait_for_kill(log: &Path) -> Vec<String> {
        for _ in 0..50 {
            let calls = std::fs::read_to_string(log).unwrap_or_default();
            if calls.lines().any(|l| l.starts_with("kill ")) {
                return calls.lines().map(str::to_string).collect();
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        std::fs::read_to_string(log).unwrap_or_default().lines().map(str::to_string).collect()
    }

    #[cfg(unix)]
    fn started_container(calls: &[String]) -> String {
        let run = calls.iter().find(|l| l.starts_with("run ")).expect("container was never started");
        run.split_whitespace()
            .skip_while(|a| *a != "--name")
            .nth(1)
            .unwrap()
            .to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_job_kills_its_container() {
        let root = tempfile::tempdir().unwrap();
        let (config, log) = fake_container_cli(root.path(), 5);
        let runner = ContainerRunner::new(config);
        let (job, env) = split_job(root.path(), Duration::from_secs(60));

        // Dropping the future is what happens to sibling chunks when one fails.
        let abandoned = tokio::time::timeout(Duration::from_millis(500), runner.run(&job, &env)).await;
        assert!(abandoned.is_err());

        let calls = wait_for_kill(&log).await;
        let name = started_container(&calls);
        assert!(calls.contains(&format!("kill {}", name)), "calls: {:?}", calls);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_job_kills_its_container() {
        let root = tempfile::tempdir().unwrap();
        let (config, log) = fake_container_cli(root.path(), 5);
        let runner = ContainerRunner::new(config);
        let (job, env) = split_job(root.path(), Duration::from_millis(500));

        let err = runner.run(&job, &env).await.unwrap_err();
        assert!(matches!(err, ChunkcodeError::Timeout { .. }));

        let calls = wait_for_kill(&log).await;
        let name = started_container(&calls);
        assert!(calls.contains(&format!("kill {}", name)), "calls: {:?}", calls);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_finished_job_leaves_container_alone() {
        let root = tempfile::tempdir().unwrap();
        let (config, log) = fake_container_cli(root.path(), 0);
        let runner = ContainerRunner::new(config);
        let (job, env) = split_job(root.path(), Duration::from_secs(60));

        runner.run(&job, &env).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(calls.lines().count(), 1);
        assert!(calls.starts_with("run "));
    }

    #[test]
    fn test_run_command_mounts_binds_read_only() {
        let runner = ContainerRunner::new(SandboxConfig::default());
        let mounts = ContainerRunner::mounts(&environment());
        let cmd = runner.run_command(&mounts, "chunkcode-test");
        assert_eq!(cmd.binary_path, "docker");
        assert!(cmd.args.contains(&"/videos/movie.mkv:/golem/binds/0/movie.mkv:ro".to_string()));
        assert!(cmd.args.contains(&"/data/tasks/t1:/golem/resources".to_string()));
        assert!(cmd.args.ends_with(&[
            "--output".to_string(),
            OUTPUT_DIR.to_string(),
        ]));
    }
}
