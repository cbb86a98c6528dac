use crate::output::print_json;
use actgate_core::config::Config;
use actgate_core::safety::SafetyGate;
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum CheckSubcommand {
    /// Would this shell command pass the blocklist?
    Command {
        /// Command line, quoted or as trailing words
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },
    /// Is this path under an allowed read prefix?
    Read { path: String },
    /// Is this path under an allowed write prefix?
    Write { path: String },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Exits non-zero when the gate refuses, so scripts can branch on it.
pub fn run(root: &Path, subcmd: CheckSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let gate = SafetyGate::from_config(&config.safety).context("invalid safety policy")?;

    let (subject, verdict) = match &subcmd {
        CheckSubcommand::Command { words } => {
            let command = words.join(" ");
            let verdict = gate.check_command(&command).map_err(|d| d.to_string());
            (command, verdict)
        }
        CheckSubcommand::Read { path } => {
            let verdict = if gate.is_path_readable(path) {
                Ok(())
            } else {
                Err("not under an allowed read prefix".to_string())
            };
            (path.clone(), verdict)
        }
        CheckSubcommand::Write { path } => {
            let verdict = if gate.is_path_writable(path) {
                Ok(())
            } else {
                Err("not under an allowed write prefix".to_string())
            };
            (path.clone(), verdict)
        }
    };

    if json {
        print_json(&serde_json::json!({
            "subject": subject,
            "allowed": verdict.is_ok(),
            "reason": verdict.as_ref().err(),
        }))?;
    } else {
        match &verdict {
            Ok(()) => println!("allowed: {subject}"),
            Err(reason) => println!("denied: {subject}\n  {reason}"),
        }
    }

    if verdict.is_err() {
        anyhow::bail!("denied by safety policy");
    }
    Ok(())
}
