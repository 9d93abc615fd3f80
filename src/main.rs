use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use firmware_forge::config::{AppConfig, DEFAULT_CONFIG_FILE};

mod cmd;

#[derive(Parser)]
#[command(name = "firmware-forge")]
#[command(version, about = "Firmware build server for SlimeVR-style trackers")]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Path to the configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP build server
    Serve {
        /// Port to listen on (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides config and LISTEN_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Enable permissive CORS for local front-end development
        #[arg(long)]
        dev: bool,
    },
    /// Print the default configuration for a board as JSON
    Defaults {
        /// Board type, e.g. BOARD_SLIMEVR
        board: String,
    },
    /// Print the generated defines.h for a configuration JSON file
    Render {
        /// Build request or configuration JSON
        file: PathBuf,
    },
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let mut config = AppConfig::load_or_default(&cli.config)?;
    config
        .apply_env()
        .context("Invalid environment override")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _log_guard = firmware_forge::logging::init(&config.log, cli.verbose, cli.log_json)?;

    match cli.command {
        Commands::Serve { port, host, dev } => {
            cmd::cmd_serve(config, port, host, dev).await?;
        }
        Commands::Defaults { board } => {
            cmd::cmd_defaults(&config, &board)?;
        }
        Commands::Render { file } => {
            cmd::cmd_render(&config, &file)?;
        }
    }

    Ok(())
}
