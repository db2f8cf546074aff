use anyhow::Result;
use clap::Args;
use serde_json::json;
use std::path::Path;

use super::load_config;
use crate::cli::Output;
use crate::engine::DiskManager;

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Technology package of the instance (overrides [instance].tech_pack)
    #[arg(long)]
    pub tech_pack: Option<String>,

    /// Set type of the instance (overrides [instance].set_type)
    #[arg(long)]
    pub set_type: Option<String>,

    /// Set name of the instance (overrides [instance].set_name)
    #[arg(long)]
    pub set_name: Option<String>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: RunArgs, custom_config: Option<&Path>, output: &Output) -> Result<()> {
    let mut config = load_config(custom_config)?;

    if let Some(tech_pack) = args.tech_pack {
        config.instance.tech_pack = tech_pack;
    }
    if let Some(set_type) = args.set_type {
        config.instance.set_type = set_type;
    }
    if let Some(set_name) = args.set_name {
        config.instance.set_name = set_name;
    }

    let manager = DiskManager::new(&config)?;
    let summary = match manager.execute() {
        Ok(summary) => summary,
        Err(e) => {
            output.error(&format!("Run for {} failed", manager.instance()));
            return Err(e);
        }
    };

    if args.json {
        let report = json!({
            "instance": manager.instance(),
            "summary": summary,
        });
        output.raw(&serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    output.success(&format!(
        "Managed {}/{} files in {}",
        summary.files_acted_on,
        summary.total_files_seen,
        manager.in_dir().display()
    ));
    output.key_value("Instance:", &manager.instance().to_string(), false);
    output.key_value("Mode:", summary.mode, true);
    output.key_value("Bytes:", &summary.bytes_transferred.to_string(), false);
    output.key_value("Elapsed:", &format!("{} ms", summary.elapsed_ms), false);

    if !summary.archives.is_empty() {
        output.info(&format!("{} archive(s) written", summary.archives.len()));
        for archive in &summary.archives {
            output.list_item(&archive.display().to_string());
        }
    }

    Ok(())
}
