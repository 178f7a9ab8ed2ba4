//! convoke CLI: the main entry point.
//!
//! Commands:
//! - `chat`: Run the turn loop interactively or for a single message
//! - `tools`: List the registered tools and their arguments
//! - `call`: Dispatch one tool directly, bypassing the model
//! - `config`: Show, locate, initialise or validate configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use convoke_config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "convoke",
    about = "convoke: tool-calling conversations with sandboxed file access",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.convoke/config.toml)
    #[arg(short, long, global = true, env = "CONVOKE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the configured model
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Maximum adapter calls per user message
        #[arg(long, default_value_t = convoke::session::DEFAULT_MAX_STEPS)]
        max_steps: usize,

        /// Request reasoning output (overrides enable_thinking)
        #[arg(long)]
        thinking: bool,
    },

    /// List available tools
    Tools,

    /// Invoke a tool directly
    Call {
        /// Tool name, e.g. read_file
        name: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (keys redacted)
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file if none exists
    Init,
    /// Validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.unwrap_or_else(AppConfig::config_path);

    match cli.command {
        Commands::Chat {
            message,
            max_steps,
            thinking,
        } => commands::chat::run(&config_path, message, max_steps, thinking).await?,
        Commands::Tools => commands::tools::list(&config_path)?,
        Commands::Call { name, args } => commands::tools::call(&config_path, &name, &args).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&config_path)?,
            ConfigAction::Path => commands::config_cmd::path(&config_path),
            ConfigAction::Init => commands::config_cmd::init(&config_path)?,
            ConfigAction::Validate => commands::config_cmd::validate(&config_path)?,
        },
    }

    Ok(())
}
