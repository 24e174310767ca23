//! CLI layer for taskpilot-rs.
//!
//! Provides the command-line interface using clap, with commands for
//! running, classifying, and planning queries.

pub mod commands;
pub mod output;
pub mod parser;

pub use commands::execute;
pub use output::OutputFormat;
pub use parser::{Cli, Commands};
