//! Persistence sink for finished job outputs.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;

use novagen_types::{sys_debug, JobId};

use crate::inference::Artifact;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Stores artifacts and hands back where they went.
pub trait ArtifactStore: Send + Sync {
    fn persist(&self, job_id: &JobId, artifacts: &[Artifact]) -> Result<Vec<PathBuf>, ArtifactError>;
}

/// Writes into `root/YYYY-MM-DD/<job_id>_<index>.<ext>`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for FsArtifactStore {
    fn persist(&self, job_id: &JobId, artifacts: &[Artifact]) -> Result<Vec<PathBuf>, ArtifactError> {
        let dir = self.root.join(Utc::now().format("%Y-%m-%d").to_string());
        fs::create_dir_all(&dir).map_err(|source| ArtifactError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let mut written = Vec::with_capacity(artifacts.len());
        for (index, artifact) in artifacts.iter().enumerate() {
            let path = dir.join(format!("{}_{}.{}", job_id, index, artifact.extension));
            fs::write(&path, &artifact.bytes).map_err(|source| ArtifactError::Write {
                path: path.clone(),
                source,
            })?;
            sys_debug!("[SCHEDULER] Saved {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}
