use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Owns the parent directory under which every job gets its own
/// subdirectory named after the job id.
#[derive(Clone, Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new<P: AsRef<Path>>(root: P) -> std::io::Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    #[tracing::instrument(skip(self))]
    pub async fn create(&self, job_id: Uuid) -> Result<Workspace, WorkspaceError> {
        let path = self.path_for(job_id);

        // Only a previous attempt of the same job can have left this behind.
        if fs::try_exists(&path).await.unwrap_or(false) {
            tracing::warn!("Removing stale workspace {}", path.display());
            let _ = fs::remove_dir_all(&path).await;
        }

        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: self.root.clone(),
                source,
            })?;
        fs::create_dir(&path)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: path.clone(),
                source,
            })?;

        tracing::debug!("Workspace ready at {}", path.display());
        Ok(Workspace {
            path,
            job_id,
            files: Vec::new(),
            removed: false,
        })
    }
}

/// A job's private directory. Removed by `cleanup`, or on drop if the
/// owning future never got that far.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    job_id: Uuid,
    files: Vec<PathBuf>,
    removed: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub async fn write_file(
        &mut self,
        name: &str,
        contents: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let path = self.path.join(name);
        fs::write(&path, contents)
            .await
            .map_err(|source| WorkspaceError::Write {
                path: path.clone(),
                source,
            })?;
        self.files.push(path.clone());
        Ok(path)
    }

    /// Best effort: failures are logged, never returned.
    pub async fn cleanup(mut self) {
        self.removed = true;
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => tracing::debug!("Workspace {} removed", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Cleanup error for job {}: {}",
                self.job_id,
                e
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!("Cleanup error for job {}: {}", self.job_id, e);
                }
            }
        }
    }
}
