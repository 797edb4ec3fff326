//! Image layer builder adapters.

pub mod layer;

pub use layer::{LayerImageBuilder, LayerMetadata, LAYER_METADATA_FILE};
