//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - ImageBuilder: materializes an image layer for a fingerprint
//! - BuildCache: remembers tags and known layers between invocations
//! - ServiceRuntime: starts, probes, waits for and stops service processes
//! - InstanceRepository: ledger of instances started by `up`
//! - SeedStore: the relational store the seeder loads
//!
//! These traits keep the orchestration services independent of processes,
//! filesystems and databases, so tests can drive them with fakes.

pub mod build_cache;
pub mod image_builder;
pub mod instance_repository;
pub mod seed_store;
pub mod service_runtime;

pub use build_cache::{BuildCache, TagRecord};
pub use image_builder::ImageBuilder;
pub use instance_repository::{InstanceRecord, InstanceRepository};
pub use seed_store::{SeedStore, StoreConnector, StoreLocation};
pub use service_runtime::{LaunchSpec, ServiceRuntime};
