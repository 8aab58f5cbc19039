//! kiln CLI - build pipeline and development server for web applications.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use kiln_bundle::Mode;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Build pipeline and development server for web applications")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to kiln.toml config file
    #[arg(short, long, default_value = "kiln.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a new project in the current directory
    Init {
        /// Overwrite existing files
        #[arg(short, long)]
        yes: bool,
    },

    /// Start development server with live updates
    Dev {
        /// Port to listen on (defaults to config or 7777)
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not open browser
        #[arg(long)]
        no_open: bool,
    },

    /// Build the project into the output directory
    Build {
        /// Build mode: development or production (defaults to KILN_MODE or config)
        #[arg(short, long)]
        mode: Option<Mode>,

        /// Source directory
        #[arg(long)]
        src: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Preview a built output directory
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "4000")]
        port: u16,

        /// Directory to serve (defaults to the configured output directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::Init { yes } => {
            commands::init::run(&cli.config, yes).await?;
        }
        Commands::Dev { port, no_open } => {
            commands::dev::run(&cli.config, port, !no_open).await?;
        }
        Commands::Build { mode, src, out } => {
            commands::build::run(&cli.config, mode, src, out).await?;
        }
        Commands::Serve { port, dir } => {
            commands::serve::run(&cli.config, port, dir).await?;
        }
    }

    Ok(())
}
