use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::errors::BuildError;
use crate::domain::models::{BuiltImage, Fingerprint, ImageSpec};

/// Port that turns an [`ImageSpec`] into a materialized layer.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Location of an existing layer for `fingerprint`, if one is present.
    fn layer_path(&self, fingerprint: &Fingerprint) -> Option<PathBuf>;

    /// Build the layer for `spec` on top of `parent`.
    ///
    /// Always builds; callers consult the cache first. Returns the layer
    /// directory. Implementations must leave no partial layer behind on
    /// failure.
    async fn build(
        &self,
        spec: &ImageSpec,
        fingerprint: &Fingerprint,
        parent: Option<&BuiltImage>,
    ) -> Result<PathBuf, BuildError>;
}
