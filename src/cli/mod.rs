//! Command-line interface for leadforge.
//!
//! Provides commands for running the generation pipeline, inspecting
//! campaigns, exporting leads and checking capability configuration.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
