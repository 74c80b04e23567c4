mod config_commands;
mod console;
mod preset_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    parley_config::ParleyConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "parley", about = "Parley: conversational chat orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./parley.toml and the user config dir).
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat on the console (default when no subcommand is provided).
    Chat(console::ChatArgs),
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// List the presets that can be loaded.
    Presets,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ParleyConfig> {
    match path {
        Some(path) => Ok(parley_config::load_config(path)?),
        None => Ok(parley_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "parley starting");

    let command = cli
        .command
        .unwrap_or_else(|| Commands::Chat(console::ChatArgs::default()));
    match command {
        Commands::Chat(args) => console::run(load_config(cli.config.as_ref())?, args).await,
        Commands::Check { verbose } => config_commands::check(cli.config.as_deref(), verbose),
        Commands::Presets => {
            preset_commands::list(&load_config(cli.config.as_ref())?);
            Ok(())
        },
    }
}
