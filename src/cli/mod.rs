//! Command-line interface for diskmanager
//!
//! The clap command tree lives in [`commands`]; [`Output`] handles everything
//! printed for the user.

pub mod commands;
mod output;

pub use commands::Cli;
pub use output::Output;
