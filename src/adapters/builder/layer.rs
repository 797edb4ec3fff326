//! Content-addressed layer directories.
//!
//! A layer is the parent layer's files overlaid with the image's build
//! context, after the image's build steps ran inside it. Layers are written
//! to a staging directory and renamed into `<layers_dir>/<fingerprint>` so a
//! failed or interrupted build never leaves a half-built layer behind.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::errors::BuildError;
use crate::domain::models::{BuiltImage, Fingerprint, ImageSpec};
use crate::domain::ports::ImageBuilder;

/// Marker written last; a layer without it is incomplete.
pub const LAYER_METADATA_FILE: &str = "layer.json";

/// Contents of [`LAYER_METADATA_FILE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub image: String,
    pub fingerprint: Fingerprint,
    pub parent: Option<Fingerprint>,
    pub created_at: DateTime<Utc>,
}

/// Builds layers as plain directories under the state directory.
pub struct LayerImageBuilder {
    layers_dir: PathBuf,
}

impl LayerImageBuilder {
    /// `layers_dir` is made absolute; build steps run with it as their
    /// working directory and also see it through `KEEL_LAYER_DIR`.
    pub fn new(layers_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            layers_dir: std::path::absolute(layers_dir.as_ref())?,
        })
    }

    pub fn layers_dir(&self) -> &Path {
        &self.layers_dir
    }

    async fn populate(
        &self,
        spec: &ImageSpec,
        fingerprint: &Fingerprint,
        parent: Option<&BuiltImage>,
        staging: &Path,
    ) -> Result<(), BuildError> {
        let image = spec.reference.to_string();
        let fail = |reason: String| BuildError::Failed {
            image: image.clone(),
            reason,
        };

        if let Some(parent_dir) = parent.and_then(|p| p.layer_dir.clone()) {
            copy_tree(parent_dir, staging.to_path_buf())
                .await
                .map_err(|e| fail(format!("copying parent layer: {e}")))?;
        }

        copy_tree(spec.context.clone(), staging.to_path_buf())
            .await
            .map_err(|e| fail(format!("copying build context {}: {e}", spec.context.display())))?;

        for (index, step) in spec.steps.iter().enumerate() {
            run_step(step, staging)
                .await
                .map_err(|reason| fail(format!("step {} failed: {reason}", index + 1)))?;
            debug!(image = %image, step = index + 1, "build step finished");
        }

        let metadata = LayerMetadata {
            image: image.clone(),
            fingerprint: fingerprint.clone(),
            parent: parent.map(|p| p.fingerprint.clone()),
            created_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&metadata).map_err(|e| fail(e.to_string()))?;
        tokio::fs::write(staging.join(LAYER_METADATA_FILE), json)
            .await
            .map_err(|e| fail(format!("writing layer metadata: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl ImageBuilder for LayerImageBuilder {
    fn layer_path(&self, fingerprint: &Fingerprint) -> Option<PathBuf> {
        let dir = self.layers_dir.join(fingerprint.as_str());
        dir.join(LAYER_METADATA_FILE).is_file().then_some(dir)
    }

    async fn build(
        &self,
        spec: &ImageSpec,
        fingerprint: &Fingerprint,
        parent: Option<&BuiltImage>,
    ) -> Result<PathBuf, BuildError> {
        let image = spec.reference.to_string();
        let io_fail = |e: std::io::Error| BuildError::Failed {
            image: image.clone(),
            reason: e.to_string(),
        };

        tokio::fs::create_dir_all(&self.layers_dir).await.map_err(io_fail)?;
        let staging = self.layers_dir.join(format!(".staging-{}", Uuid::new_v4()));
        tokio::fs::create_dir(&staging).await.map_err(io_fail)?;

        if let Err(err) = self.populate(spec, fingerprint, parent, &staging).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(err);
        }

        let target = self.layers_dir.join(fingerprint.as_str());
        if target.exists() {
            // Forced rebuild, or a concurrent build of identical content.
            let _ = tokio::fs::remove_dir_all(&target).await;
        }
        tokio::fs::rename(&staging, &target).await.map_err(io_fail)?;

        info!(image = %image, fingerprint = %fingerprint.short(), "layer built");
        Ok(target)
    }
}

async fn run_step(argv: &[String], dir: &Path) -> Result<(), String> {
    let (program, args) = argv.split_first().ok_or_else(|| "empty command".to_string())?;

    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .env("KEEL_LAYER_DIR", dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| format!("{program}: {e}"))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let tail = lines[lines.len().saturating_sub(5)..].join("\n");
    Err(format!("{} exited with {}: {}", program, output.status, tail.trim()))
}

/// Recursively copy `src` into `dst`, overwriting files that exist in both.
async fn copy_tree(src: PathBuf, dst: PathBuf) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || copy_tree_blocking(&src, &dst))
        .await
        .map_err(std::io::Error::other)?
}

fn copy_tree_blocking(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree_blocking(&entry.path(), &target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
