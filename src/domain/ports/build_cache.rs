use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::errors::StateError;
use crate::domain::models::{Fingerprint, ImageRef};

/// Last successful build of an image name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagRecord {
    pub reference: ImageRef,
    pub fingerprint: Fingerprint,
    pub built_at: DateTime<Utc>,
}

/// Repository port for the content-addressed build cache
#[async_trait]
pub trait BuildCache: Send + Sync {
    /// Fingerprint last built successfully under `reference`
    async fn tagged(&self, reference: &ImageRef) -> Result<Option<Fingerprint>, StateError>;

    /// Whether any image has produced a layer with this fingerprint
    async fn has_layer(&self, fingerprint: &Fingerprint) -> Result<bool, StateError>;

    /// Record a successful build: register the layer and point the tag at it
    async fn record(&self, reference: &ImageRef, fingerprint: &Fingerprint)
        -> Result<(), StateError>;

    /// All tags, ordered by reference
    async fn tags(&self) -> Result<Vec<TagRecord>, StateError>;
}
