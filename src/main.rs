mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Types
// ============================================================================

/// minekeeper - keep Minecraft accounts online, unattended
#[derive(Parser, Debug)]
#[command(version = minekeeper::build_info::VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the keeper daemon for all configured accounts
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "minekeeper.yaml")]
        config: String,
    },

    /// Acquire and cache a credential for one account interactively
    Login {
        /// Account name (must be listed in the config)
        account: String,

        /// Path to configuration file
        #[arg(short, long, default_value = "minekeeper.yaml")]
        config: String,
    },

    /// Show cached credential usability per account
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "minekeeper.yaml")]
        config: String,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => commands::run::run(&config).await,
        Commands::Login { account, config } => commands::login::run(&account, &config).await,
        Commands::Check { config } => commands::check::run(&config).await,
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
