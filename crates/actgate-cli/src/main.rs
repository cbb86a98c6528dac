mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    backups::BackupsSubcommand, check::CheckSubcommand, config::ConfigSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "actgate",
    about = "Let a language model propose file and shell actions, and run only the ones you approve",
    version,
    propagate_version = true
)]
struct Cli {
    /// Directory holding .actgate/config.yaml (default: auto-detect from cwd)
    #[arg(long, global = true, env = "ACTGATE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session with the configured model
    Chat {
        /// Extra instructions appended to the system prompt
        #[arg(long)]
        instructions: Option<String>,
    },

    /// Ask the safety gate about a command or path without running anything
    Check {
        #[command(subcommand)]
        subcommand: CheckSubcommand,
    },

    /// Extract action tags from a file (or stdin) and show what would be proposed
    Scan {
        /// File to scan; reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Execute the actions tagged in TEXT directly, treating this call as approval
    Exec {
        /// Text containing one or more action tags
        text: String,
    },

    /// Inspect, validate, or create the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Inspect file backups taken before overwrites
    Backups {
        #[command(subcommand)]
        subcommand: BackupsSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Chat { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Chat { instructions } => cmd::chat::run(&root, instructions.as_deref(), cli.json),
        Commands::Check { subcommand } => cmd::check::run(&root, subcommand, cli.json),
        Commands::Scan { file } => cmd::scan::run(file.as_deref(), cli.json),
        Commands::Exec { text } => cmd::exec::run(&root, &text, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Backups { subcommand } => cmd::backups::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
