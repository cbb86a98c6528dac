pub mod backups;
pub mod chat;
pub mod check;
pub mod config;
pub mod exec;
pub mod scan;

use actgate_core::config::Config;
use actgate_core::executor::Executor;
use actgate_core::safety::SafetyGate;
use anyhow::Context;
use std::path::Path;

/// Config, gate, and executor as every executing command needs them.
pub(crate) fn load_runtime(root: &Path) -> anyhow::Result<(Config, SafetyGate, Executor)> {
    let config = Config::load(root).context("failed to load config")?;
    let gate = SafetyGate::from_config(&config.safety).context("invalid safety policy")?;
    let executor = Executor::from_config(&config, gate.clone())?;
    Ok((config, gate, executor))
}
