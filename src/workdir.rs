//! Per-task directory layout.
//!
//! Every task owns one directory under the configured work root and never
//! shares it with another task:
//!
//! ```text
//! <root>/<task id>/
//!     resources/        transcoded chunks, merge input
//!     tmp/              scratch space for extract and split
//!     tmp/chunk-<N>/    scratch space for one chunk transcode
//!     output/           extracted video stream and split segments
//!     merge/work/
//!     merge/output/     merged video and the final file
//!     verify/<label>/   probe reports
//! ```

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use crate::media::DirMapping;

#[derive(Debug, Clone)]
pub struct TaskDirs {
    root: PathBuf,
}

impl TaskDirs {
    /// Layout for `task_id` under `work_root`. Nothing is created yet.
    pub fn new<P: AsRef<Path>>(work_root: P, task_id: &str) -> Self {
        Self {
            root: work_root.as_ref().join(task_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resources(&self) -> PathBuf {
        self.root.join("resources")
    }

    pub fn temporary(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn output(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn merge_work(&self) -> PathBuf {
        self.root.join("merge").join("work")
    }

    pub fn merge_output(&self) -> PathBuf {
        self.root.join("merge").join("output")
    }

    pub fn chunk_work(&self, index: usize) -> PathBuf {
        self.temporary().join(format!("chunk-{}", index))
    }

    pub fn verify(&self, label: &str) -> PathBuf {
        self.root.join("verify").join(label)
    }

    /// Mapping for the extract and split stages.
    pub fn stage_mapping(&self) -> DirMapping {
        let tmp = self.temporary();
        DirMapping::new(&self.resources(), &tmp, &tmp, &self.output(), &tmp)
    }

    /// Mapping for one chunk transcode. Segments are read from the split
    /// output and the transcoded chunk lands in `resources`, next to its
    /// siblings, where the merge expects it.
    pub fn chunk_mapping(&self, index: usize) -> DirMapping {
        let work = self.chunk_work(index);
        DirMapping::new(&self.output(), &work, &work, &self.resources(), &work)
    }

    /// Mapping for the merge and replace stages.
    pub fn merge_mapping(&self) -> DirMapping {
        let work = self.merge_work();
        let output = self.merge_output();
        DirMapping::new(&self.resources(), &work, &work, &output, &output)
    }

    pub async fn create(&self) -> Result<()> {
        for dir in [self.resources(), self.temporary(), self.output()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        debug!("Task directory prepared: {}", self.root.display());
        Ok(())
    }

    /// Remove the whole task directory. Failures are logged, not raised.
    pub async fn cleanup(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
            warn!("Failed to remove task directory {}: {}", self.root.display(), e);
        }
    }
}
