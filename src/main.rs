use anyhow::Result;
use clap::Parser;
use diskmanager::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run()
}
