//! Named persistent volumes under `<state_dir>/volumes`.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::errors::StateError;
use crate::domain::models::{is_valid_volume_name, Volume};

/// Creates, locates and purges volume directories.
///
/// Volumes outlive every instance bound to them; only [`Self::purge`]
/// removes one.
#[derive(Debug, Clone)]
pub struct VolumeManager {
    root: PathBuf,
}

impl VolumeManager {
    /// `root` is made absolute so services started in other working
    /// directories see the same path.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StateError> {
        Ok(Self {
            root: std::path::absolute(root.as_ref())?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> Result<PathBuf, StateError> {
        if !is_valid_volume_name(name) {
            return Err(StateError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid volume name '{name}'"),
            )));
        }
        Ok(self.root.join(name))
    }

    /// Create the volume directory if it does not exist yet.
    pub async fn ensure(&self, name: &str) -> Result<Volume, StateError> {
        let path = self.path(name)?;
        if !tokio::fs::try_exists(&path).await? {
            info!(volume = name, path = %path.display(), "creating volume");
        }
        tokio::fs::create_dir_all(&path).await?;
        Ok(Volume {
            name: name.to_string(),
            path,
        })
    }

    /// Delete a volume and everything in it. Returns whether it existed.
    pub async fn purge(&self, name: &str) -> Result<bool, StateError> {
        let path = self.path(name)?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                info!(volume = name, "volume purged");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(volume = name, "volume already absent");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Volumes currently on disk, sorted by name.
    pub async fn list(&self) -> Result<Vec<Volume>, StateError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut volumes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                volumes.push(Volume {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: entry.path(),
                });
            }
        }
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_is_idempotent_and_keeps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let volumes = VolumeManager::new(dir.path()).unwrap();

        let volume = volumes.ensure("pgdata").await.unwrap();
        std::fs::write(volume.path.join("data"), "x").unwrap();

        let again = volumes.ensure("pgdata").await.unwrap();
        assert_eq!(again.path, volume.path);
        assert!(again.path.join("data").exists());
    }

    #[tokio::test]
    async fn test_purge_removes_volume() {
        let dir = tempfile::tempdir().unwrap();
        let volumes = VolumeManager::new(dir.path()).unwrap();
        volumes.ensure("pgdata").await.unwrap();

        assert!(volumes.purge("pgdata").await.unwrap());
        assert!(!volumes.purge("pgdata").await.unwrap());
        assert!(volumes.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let volumes = VolumeManager::new(dir.path().join("volumes")).unwrap();
        assert!(volumes.list().await.unwrap().is_empty());

        volumes.ensure("zeta").await.unwrap();
        volumes.ensure("alpha").await.unwrap();
        let names: Vec<_> = volumes.list().await.unwrap().into_iter().map(|v| v.name).collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let volumes = VolumeManager::new("/tmp/keel-volumes").unwrap();
        assert!(volumes.path("../etc").is_err());
    }
}
