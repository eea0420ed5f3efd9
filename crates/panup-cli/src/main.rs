mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "panup")]
#[command(about = "Resumable uploads to a cloud drive")]
#[command(version)]
struct Cli {
    /// Path to the panup config directory (default: ~/.panup)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Log every request and chunk
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and state directory
    Init,

    /// Upload one or more files
    Upload {
        /// Local files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Remote destination. A trailing `/` (or several files) names a directory.
        #[arg(long, short, default_value = "/")]
        to: String,

        /// Print each result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List unfinished uploads that can be resumed
    Sessions,

    /// Remove stale session records
    Gc {
        /// Override the configured retention
        #[arg(long)]
        max_age_days: Option<u64>,
    },

    /// Show current configuration
    Config,

    /// Check the configured access token
    Whoami,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let base_dir = match cli.config_dir {
        Some(ref dir) => dir.clone(),
        None => panup_core::config::PanupConfig::default_base_dir()?,
    };

    let debug = cli.verbose || commands::debug_enabled(&base_dir);
    let directive = if debug { "panup=debug" } else { "panup=info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Init => commands::init::run(&base_dir),
        Commands::Upload {
            ref files,
            ref to,
            json,
        } => rt.block_on(commands::upload::run(&base_dir, files, to, json)),
        Commands::Sessions => commands::sessions::run(&base_dir),
        Commands::Gc { max_age_days } => commands::gc::run(&base_dir, max_age_days),
        Commands::Config => commands::config::run(&base_dir),
        Commands::Whoami => rt.block_on(commands::whoami::run(&base_dir)),
    }
}
