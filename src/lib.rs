//! # diskmanager - scheduled disk hygiene
//!
//! One run walks a configured input directory, classifies every file by age
//! and applies the configured disposition to the old ones:
//!
//! - **move** them into an output directory
//! - **archive** them into a sequence of size-bounded zip files
//! - **delete** them
//!
//! Age comes either from the filesystem modification time or from a
//! timestamp embedded in the file name.
//!
//! ## Quick Start
//!
//! ```bash
//! # Check a configuration without touching any file
//! diskmanager --config cleanup.toml config validate
//!
//! # Run one pass for an instance
//! diskmanager --config cleanup.toml run --tech-pack DC_E_ABC --set-name cleanup
//! ```
//!
//! Runs are single-threaded and must not overlap on the same tree.

pub mod archive;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod engine;
pub mod filters;
pub mod policy;
pub mod walker;

pub use cli::{Cli, Output};
pub use config::DiskManagerConfig;
pub use engine::{DiskManager, RunSummary};

/// Result type alias for diskmanager operations
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
