//! Service runtime adapters.

pub mod process;

pub use process::ProcessRuntime;
