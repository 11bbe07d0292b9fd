//! Corpus Coordinator entry point
//!
//! `serve` binds the HTTP surface over a state directory; `coverage`
//! prints the current dashboard without starting the server.
//!
//! # Exit codes
//!
//! Non-zero on schema load failure, state-directory access failure, or
//! port bind failure; 0 on clean shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use corpus_coordinator::{
    create_router, AppState, CliOverrides, CommandCodec, ConfigFile, Coordinator,
    CoordinatorConfig, IndentCodec, ToonCodec, AGENT_ID, AGENT_VERSION,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "corpus-coordinator")]
#[command(about = "Coordinator for synthetic succession-case corpus generation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to a JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,

        /// State directory for logs, counters, and exports
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Master schema file
        #[arg(long)]
        master_schema_file: Option<PathBuf>,

        /// Seed corpus JSONL file
        #[arg(long)]
        corpus_file: Option<PathBuf>,

        /// Total corpus size including seeds
        #[arg(long)]
        target_total_cases: Option<u64>,

        /// Synthetic cases to generate; defaults to target minus seeds
        #[arg(long)]
        generation_target: Option<u64>,

        /// RNG seed for reproducible issuance
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the current coverage dashboard from a state directory
    Coverage {
        /// State directory to read
        #[arg(long, default_value = "data/corpus_coordinator")]
        state_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            state_dir,
            master_schema_file,
            corpus_file,
            target_total_cases,
            generation_target,
            seed,
        } => {
            let file = match config {
                Some(path) => ConfigFile::load(&path)?,
                None => ConfigFile::default(),
            };
            let overrides = CliOverrides {
                state_dir,
                host,
                port,
                master_schema_file,
                corpus_file,
                target_total_cases,
                generation_target,
                seed,
            };
            let config = CoordinatorConfig::resolve(file, overrides)?;

            let codec: Arc<dyn ToonCodec> = if config.codec_command.is_empty() {
                Arc::new(IndentCodec)
            } else {
                Arc::new(CommandCodec::new(
                    &config.codec_command,
                    config.codec_timeout(),
                )?)
            };

            let bind_addr = config.bind_addr();
            let coordinator = Coordinator::bootstrap(config, codec)?;
            let router = create_router(AppState::new(coordinator));

            tracing::info!(
                agent_id = AGENT_ID,
                version = AGENT_VERSION,
                addr = %bind_addr,
                "starting corpus coordinator"
            );
            let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
            axum::serve(listener, router).await?;
        }

        Commands::Coverage { state_dir } => {
            let summary_path = state_dir.join("summary.json");
            let text = std::fs::read_to_string(&summary_path).map_err(|err| {
                anyhow::anyhow!("cannot read {}: {err}", summary_path.display())
            })?;
            let summary: serde_json::Value = serde_json::from_str(&text)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
