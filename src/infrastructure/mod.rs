//! Infrastructure layer module
//!
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Persistent volume directories

pub mod config;
pub mod logging;
pub mod volumes;

pub use volumes::VolumeManager;
