//! Orchestration manifest.
//!
//! [`ManifestDocument`] mirrors the YAML file; [`Manifest`] is the validated
//! form produced by [`crate::services::ManifestLoader`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::image::{ImageRef, ImageSpec, DEFAULT_TAG};
use super::service::{ServiceRole, ServiceSpec};

/// Raw manifest document as written by users.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestDocument {
    /// Images that resolve without being built here
    #[serde(default)]
    pub external_images: Vec<String>,

    #[serde(default)]
    pub images: Vec<ImageDefinition>,

    #[serde(default)]
    pub services: Vec<ServiceDefinition>,

    #[serde(default)]
    pub seed: Option<SeedDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageDefinition {
    pub name: String,

    #[serde(default = "default_tag")]
    pub tag: String,

    /// Build context, relative to the manifest directory
    pub context: PathBuf,

    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub steps: Vec<Vec<String>>,
}

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDefinition {
    pub name: String,

    pub image: String,

    #[serde(default)]
    pub role: ServiceRole,

    #[serde(default)]
    pub command: Option<Vec<String>>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default)]
    pub healthcheck: Option<HealthCheckDefinition>,

    #[serde(default)]
    pub volumes: Vec<VolumeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckDefinition {
    pub test: Vec<String>,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,
}

const fn default_interval_ms() -> u64 {
    1000
}

const fn default_timeout_ms() -> u64 {
    5000
}

const fn default_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeDefinition {
    pub name: String,

    /// Environment key receiving the volume directory
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedDefinition {
    /// Name of the `store` service
    pub store: String,

    /// Dataset file, relative to the manifest directory
    pub dataset: PathBuf,

    /// Dataset version; defaults to the file's content hash
    #[serde(default)]
    pub version: Option<String>,
}

/// Validated seeding instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSpec {
    pub store: String,
    pub dataset: PathBuf,
    pub version: Option<String>,
}

/// Validated manifest. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Directory relative paths were resolved against
    pub base_dir: PathBuf,
    pub external_images: BTreeSet<ImageRef>,
    pub images: Vec<ImageSpec>,
    pub services: Vec<ServiceSpec>,
    pub seed: Option<SeedSpec>,
}

impl Manifest {
    pub fn image(&self, reference: &ImageRef) -> Option<&ImageSpec> {
        self.images.iter().find(|i| &i.reference == reference)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn is_external(&self, reference: &ImageRef) -> bool {
        self.external_images.contains(reference)
    }

    /// The service with role `store`, if any.
    pub fn store(&self) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.role == ServiceRole::Store)
    }

    /// The service with role `module`, if any.
    pub fn module(&self) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.role == ServiceRole::Module)
    }

    /// Every volume name bound by any service.
    pub fn volume_names(&self) -> BTreeSet<String> {
        self.services
            .iter()
            .flat_map(|s| s.volumes.iter().map(|v| v.name.clone()))
            .collect()
    }
}
