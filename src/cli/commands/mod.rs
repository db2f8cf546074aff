use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

pub mod config;
pub mod run;

use crate::config::DiskManagerConfig;

#[derive(Parser)]
#[command(
    name = "diskmanager",
    version = env!("CARGO_PKG_VERSION"),
    about = "Move, archive or delete aged files under a directory tree",
    long_about = "diskmanager runs one pass over a configured input directory and moves, zips \
                  or deletes the files that are older than the configured age."
)]
pub struct Cli {
    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use custom configuration file
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one pass for an instance
    Run(run::RunArgs),
    /// Configuration management
    Config(config::ConfigArgs),
}

impl Cli {
    pub fn run(self) -> Result<()> {
        setup_logging(self.verbose, self.quiet);

        let output = crate::cli::Output::new(self.quiet);
        match self.command {
            Some(Commands::Run(args)) => run::execute(args, self.config.as_deref(), &output),
            Some(Commands::Config(args)) => config::execute(args, self.config.as_deref(), &output),
            None => {
                Cli::command().print_help()?;
                Ok(())
            }
        }
    }
}

/// Load the layered configuration, using `--config` when given
pub(crate) fn load_config(custom_config: Option<&std::path::Path>) -> Result<DiskManagerConfig> {
    DiskManagerConfig::load_with_custom_config(custom_config)
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => tracing_subscriber::EnvFilter::new("warn"),
        1 => tracing_subscriber::EnvFilter::new("info"),
        2 => tracing_subscriber::EnvFilter::new("debug"),
        _ => tracing_subscriber::EnvFilter::new("trace"),
    });

    // Logs go to stderr so `config show` output stays parseable
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
