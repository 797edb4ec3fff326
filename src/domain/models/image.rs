//! Image layer domain model.
//!
//! Images form a DAG through their optional parent reference. Each declared
//! image is built into a content-addressed layer identified by its
//! [`Fingerprint`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::errors::ManifestError;

/// Tag used when a reference omits one.
pub const DEFAULT_TAG: &str = "latest";

/// Image identity: `name:tag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Parse `name[:tag]`. A colon followed by a path segment belongs to a
    /// registry host (`host:5000/img`), not a tag.
    pub fn parse(reference: &str) -> Result<Self, ManifestError> {
        let reference = reference.trim();
        let (name, tag) = match reference.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (reference, DEFAULT_TAG),
        };

        if name.is_empty() || tag.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(ManifestError::InvalidImageRef(reference.to_string()));
        }

        Ok(Self::new(name, tag))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl FromStr for ImageRef {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Validated, immutable image layer definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub reference: ImageRef,
    /// Absolute build context directory
    pub context: PathBuf,
    pub parent: Option<ImageRef>,
    /// Commands run inside the layer directory, in order
    pub steps: Vec<Vec<String>>,
}

/// Hex SHA-256 content fingerprint of a layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex digits, for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An image that is ready to instantiate services from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    pub reference: ImageRef,
    pub fingerprint: Fingerprint,
    /// Layer directory; `None` for external images
    pub layer_dir: Option<PathBuf>,
}
