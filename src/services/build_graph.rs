//! Build graph engine.
//!
//! Builds declared images parents-first, one topological wave at a time.
//! Images of a wave build concurrently. A layer is rebuilt only when its
//! content fingerprint changed; a failure skips the image's descendants
//! while independent subtrees keep building.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::dependency_resolver::{DependencyGraph, DependencyResolver};
use crate::domain::errors::{BuildError, ManifestError, OrchestratorError, StateError};
use crate::domain::models::{BuiltImage, Fingerprint, ImageRef, ImageSpec, Manifest};
use crate::domain::ports::{BuildCache, ImageBuilder};

/// Outcome for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum BuildStatus {
    /// Provided outside the manifest; nothing to build
    External,
    /// Tag already points at this fingerprint
    Cached,
    /// Layer already existed under another tag or an older build
    Reused,
    Built,
    Failed(String),
    /// Not attempted because an ancestor failed
    Skipped { parent: String },
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Cached => "cached",
            Self::Reused => "reused",
            Self::Built => "built",
            Self::Failed(_) => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Failed(_) | Self::Skipped { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageBuildResult {
    pub reference: ImageRef,
    #[serde(flatten)]
    pub status: BuildStatus,
    pub fingerprint: Option<Fingerprint>,
    pub layer_dir: Option<PathBuf>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ImageBuildResult {
    fn failed(reference: ImageRef, reason: String, started: Instant) -> Self {
        Self {
            reference,
            status: BuildStatus::Failed(reason),
            fingerprint: None,
            layer_dir: None,
            duration: started.elapsed(),
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Results of one build run, in build order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub results: Vec<ImageBuildResult>,
}

impl BuildReport {
    pub fn result(&self, reference: &ImageRef) -> Option<&ImageBuildResult> {
        self.results.iter().find(|r| &r.reference == reference)
    }

    /// Every failed or skipped image as a [`BuildError`].
    pub fn errors(&self) -> Vec<BuildError> {
        self.results
            .iter()
            .filter_map(|r| match &r.status {
                BuildStatus::Failed(reason) => Some(BuildError::Failed {
                    image: r.reference.to_string(),
                    reason: reason.clone(),
                }),
                BuildStatus::Skipped { parent } => Some(BuildError::ParentFailed {
                    image: r.reference.to_string(),
                    parent: parent.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.status.is_ok())
    }

    /// The ready-to-use image for `reference`, if it built.
    pub fn built_image(&self, reference: &ImageRef) -> Option<BuiltImage> {
        let result = self.result(reference)?;
        if !result.status.is_ok() {
            return None;
        }
        Some(BuiltImage {
            reference: result.reference.clone(),
            fingerprint: result.fingerprint.clone()?,
            layer_dir: result.layer_dir.clone(),
        })
    }

    /// Images whose layer was actually (re)built in this run.
    pub fn rebuilt(&self) -> Vec<&ImageRef> {
        self.results
            .iter()
            .filter(|r| r.status == BuildStatus::Built)
            .map(|r| &r.reference)
            .collect()
    }
}

/// Drives image builds through an [`ImageBuilder`] with a [`BuildCache`].
pub struct BuildGraphEngine {
    builder: Arc<dyn ImageBuilder>,
    cache: Arc<dyn BuildCache>,
    max_parallel: usize,
    resolver: DependencyResolver,
}

impl BuildGraphEngine {
    pub fn new(builder: Arc<dyn ImageBuilder>, cache: Arc<dyn BuildCache>, max_parallel: usize) -> Self {
        Self {
            builder,
            cache,
            max_parallel: max_parallel.max(1),
            resolver: DependencyResolver::new(),
        }
    }

    /// Build order as waves of image references.
    pub fn plan(&self, manifest: &Manifest) -> Result<Vec<Vec<ImageRef>>, ManifestError> {
        let graph: DependencyGraph = manifest
            .images
            .iter()
            .map(|i| {
                (
                    i.reference.to_string(),
                    i.parent
                        .iter()
                        .filter(|p| manifest.image(p).is_some())
                        .map(ToString::to_string)
                        .collect(),
                )
            })
            .collect();

        let by_name: HashMap<String, &ImageRef> = manifest
            .images
            .iter()
            .map(|i| (i.reference.to_string(), &i.reference))
            .collect();

        let waves = self
            .resolver
            .topological_waves(&graph)
            .map_err(ManifestError::ImageCycle)?;

        Ok(waves
            .into_iter()
            .map(|wave| {
                wave.iter()
                    .filter_map(|name| by_name.get(name).map(|r| (*r).clone()))
                    .collect()
            })
            .collect())
    }

    /// Build every image the manifest declares.
    ///
    /// Build failures are reported in the [`BuildReport`]; only state
    /// database failures abort the run.
    pub async fn build(&self, manifest: &Manifest, force: bool) -> Result<BuildReport, OrchestratorError> {
        let waves = self.plan(manifest)?;
        let mut report = BuildReport::default();
        let mut built: HashMap<ImageRef, BuiltImage> = HashMap::new();
        // Failed image -> the root failure it descends from
        let mut failed: HashMap<ImageRef, String> = HashMap::new();

        for external in &manifest.external_images {
            let image = BuiltImage {
                reference: external.clone(),
                fingerprint: external_fingerprint(external),
                layer_dir: None,
            };
            report.results.push(ImageBuildResult {
                reference: external.clone(),
                status: BuildStatus::External,
                fingerprint: Some(image.fingerprint.clone()),
                layer_dir: None,
                duration: Duration::ZERO,
            });
            built.insert(external.clone(), image);
        }

        for wave in waves {
            let mut jobs = Vec::new();

            for reference in wave {
                let Some(spec) = manifest.image(&reference) else {
                    continue;
                };

                let parent_failure = spec.parent.as_ref().and_then(|p| failed.get(p).map(|root| (p, root)));
                if let Some((parent, root)) = parent_failure {
                    warn!(image = %reference, parent = %parent, "skipping image, ancestor failed");
                    let root = root.clone();
                    report.results.push(ImageBuildResult {
                        reference: reference.clone(),
                        status: BuildStatus::Skipped {
                            parent: parent.to_string(),
                        },
                        fingerprint: None,
                        layer_dir: None,
                        duration: Duration::ZERO,
                    });
                    failed.insert(reference, root);
                    continue;
                }

                let parent = spec.parent.as_ref().and_then(|p| built.get(p).cloned());
                jobs.push((spec, parent));
            }

            let results: Vec<Result<ImageBuildResult, StateError>> = stream::iter(jobs)
                .map(|(spec, parent)| self.build_one(spec, parent, force))
                .buffer_unordered(self.max_parallel)
                .collect()
                .await;

            let mut results = results.into_iter().collect::<Result<Vec<_>, _>>()?;
            results.sort_by(|a, b| a.reference.cmp(&b.reference));

            for result in results {
                if result.status.is_ok() {
                    if let Some(fingerprint) = result.fingerprint.clone() {
                        built.insert(
                            result.reference.clone(),
                            BuiltImage {
                                reference: result.reference.clone(),
                                fingerprint,
                                layer_dir: result.layer_dir.clone(),
                            },
                        );
                    }
                } else {
                    failed.insert(result.reference.clone(), result.reference.to_string());
                }
                report.results.push(result);
            }
        }

        Ok(report)
    }

    async fn build_one(
        &self,
        spec: &ImageSpec,
        parent: Option<BuiltImage>,
        force: bool,
    ) -> Result<ImageBuildResult, StateError> {
        let started = Instant::now();
        let reference = spec.reference.clone();

        let fingerprint = match compute_fingerprint(spec, parent.as_ref().map(|p| &p.fingerprint)).await {
            Ok(fp) => fp,
            Err(e) => {
                warn!(image = %reference, error = %e, "failed to fingerprint build context");
                return Ok(ImageBuildResult::failed(reference, e.to_string(), started));
            }
        };

        let finish = |status: BuildStatus, layer_dir: PathBuf| {
            info!(
                image = %reference,
                fingerprint = %fingerprint.short(),
                status = status.as_str(),
                "image ready"
            );
            ImageBuildResult {
                reference: reference.clone(),
                status,
                fingerprint: Some(fingerprint.clone()),
                layer_dir: Some(layer_dir),
                duration: started.elapsed(),
            }
        };

        if !force {
            if let Some(layer_dir) = self.builder.layer_path(&fingerprint) {
                if self.cache.tagged(&reference).await?.as_ref() == Some(&fingerprint) {
                    return Ok(finish(BuildStatus::Cached, layer_dir));
                }
                if self.cache.has_layer(&fingerprint).await? {
                    self.cache.record(&reference, &fingerprint).await?;
                    return Ok(finish(BuildStatus::Reused, layer_dir));
                }
            }
        }

        match self.builder.build(spec, &fingerprint, parent.as_ref()).await {
            Ok(layer_dir) => {
                self.cache.record(&reference, &fingerprint).await?;
                Ok(finish(BuildStatus::Built, layer_dir))
            }
            Err(err) => {
                warn!(image = %reference, error = %err, "image build failed");
                let reason = match err {
                    BuildError::Failed { reason, .. } => reason,
                    other => other.to_string(),
                };
                Ok(ImageBuildResult::failed(reference.clone(), reason, started))
            }
        }
    }
}

/// Fingerprint of an image supplied outside the manifest.
pub fn external_fingerprint(reference: &ImageRef) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(b"external\0");
    hasher.update(reference.to_string().as_bytes());
    Fingerprint::new(hex::encode(hasher.finalize()))
}

/// Content fingerprint of a declared image.
///
/// Covers the parent fingerprint, the build steps and every regular file in
/// the build context (sorted relative path plus bytes). The image name is
/// not included, so identical content under two names shares a layer.
pub async fn compute_fingerprint(
    spec: &ImageSpec,
    parent: Option<&Fingerprint>,
) -> std::io::Result<Fingerprint> {
    let context = spec.context.clone();
    let steps = spec.steps.clone();
    let parent = parent.cloned();

    tokio::task::spawn_blocking(move || fingerprint_blocking(&context, &steps, parent.as_ref()))
        .await
        .map_err(std::io::Error::other)?
}

fn fingerprint_blocking(
    context: &Path,
    steps: &[Vec<String>],
    parent: Option<&Fingerprint>,
) -> std::io::Result<Fingerprint> {
    let mut hasher = Sha256::new();
    hasher.update(b"keel-layer-v1\0");

    let write_field = |hasher: &mut Sha256, bytes: &[u8]| {
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    };

    write_field(&mut hasher, parent.map_or("", Fingerprint::as_str).as_bytes());

    hasher.update((steps.len() as u64).to_le_bytes());
    for step in steps {
        hasher.update((step.len() as u64).to_le_bytes());
        for arg in step {
            write_field(&mut hasher, arg.as_bytes());
        }
    }

    let mut files = Vec::new();
    collect_files(context, context, &mut files)?;
    files.sort();

    hasher.update((files.len() as u64).to_le_bytes());
    for relative in files {
        let bytes = std::fs::read(context.join(&relative))?;
        write_field(&mut hasher, relative.as_bytes());
        write_field(&mut hasher, &bytes);
    }

    Ok(Fingerprint::new(hex::encode(hasher.finalize())))
}

/// Relative, `/`-separated paths of every regular file under `dir`.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(std::io::Error::other)?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(relative);
        }
    }
    Ok(())
}
