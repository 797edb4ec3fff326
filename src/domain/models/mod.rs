pub mod config;
pub mod dataset;
pub mod image;
pub mod manifest;
pub mod service;
pub mod volume;

pub use config::{BuildConfig, Config, DatabaseConfig, LoggingConfig, RuntimeConfig};
pub use dataset::{Dataset, DatasetRecord, DatasetRow, SeedOutcome, SeedState};
pub use image::{BuiltImage, Fingerprint, ImageRef, ImageSpec, DEFAULT_TAG};
pub use manifest::{
    HealthCheckDefinition, ImageDefinition, Manifest, ManifestDocument, SeedDefinition, SeedSpec,
    ServiceDefinition, VolumeDefinition,
};
pub use service::{
    HealthCheck, HealthProbeResult, ServiceHandle, ServiceInstance, ServiceRole, ServiceSpec,
    ServiceState, StateTransition, VolumeBinding, MODULE_ENV_CONTRACT, STORE_HOST, STORE_NAME,
    STORE_PASSWORD, STORE_USER,
};
pub use volume::{is_valid_volume_name, Volume};
