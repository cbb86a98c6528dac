use crate::output::{print_json, print_table};
use actgate_core::backup::BackupStore;
use actgate_core::config::Config;
use anyhow::Context;
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum BackupsSubcommand {
    /// List backups, newest last
    List {
        /// Only backups of this file
        #[arg(long = "for", value_name = "PATH")]
        original: Option<PathBuf>,
    },
}

pub fn run(root: &Path, subcmd: BackupsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        BackupsSubcommand::List { original } => list(root, original.as_deref(), json),
    }
}

fn list(root: &Path, original: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let store = BackupStore::new(config.backup_dir()?);
    let records = match original {
        Some(path) => store.list_for(path)?,
        None => store.list()?,
    };

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No backups in {}.", store.dir().display());
        return Ok(());
    }
    let rows = records
        .iter()
        .map(|r| {
            vec![
                r.original(),
                r.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                r.path.display().to_string(),
            ]
        })
        .collect();
    print_table(&["ORIGINAL", "CREATED", "BACKUP"], rows);
    Ok(())
}
