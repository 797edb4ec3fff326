//! Persistent volume model.

use std::path::PathBuf;

use serde::Serialize;

/// A named persistent directory. Outlives every instance bound to it and is
/// removed only by a purge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volume {
    pub name: String,
    pub path: PathBuf,
}

/// Whether `name` is usable as a volume directory name.
pub fn is_valid_volume_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
