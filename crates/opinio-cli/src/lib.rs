//! Opinio CLI - command line front end.
//!
//! Argument parsing lives in [`config`], CSV handling in [`dataset`]; the
//! binary in `main.rs` wires them to `opinio-core` and `opinio-client`.

pub mod config;
pub mod dataset;

pub use config::{AnalyzeArgs, Command, Config, default_output_path, version_info};
pub use dataset::Dataset;
