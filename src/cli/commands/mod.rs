//! CLI command implementations.
//!
//! Each `execute` returns the process exit code on completion; errors are
//! mapped to exit codes by [`crate::cli::handle_error`].

pub mod build;
pub mod down;
pub mod module;
pub mod status;
pub mod store;
pub mod up;
