//! Adapters for the filesystem, host processes and SQLite.

pub mod builder;
pub mod runtime;
pub mod sqlite;
