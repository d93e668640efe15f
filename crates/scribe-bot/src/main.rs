use clap::{Parser, Subcommand};
use tracing::error;

mod app;

/// Indexes a chat server's history into per-server vector collections and
/// answers questions about it over direct messages.
#[derive(Parser)]
#[command(name = "scribe", version)]
struct Args {
    /// Path to the config file (default: ./scribe.toml).
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Register a server for indexing (run before starting the bot).
    Setup {
        /// Platform server (guild) id.
        #[arg(long)]
        server: String,
        /// What to do when a message fails processing: skip or stop.
        #[arg(long, default_value = "skip")]
        on_failure: String,
        /// Embedding model override; omitted means the global default.
        #[arg(long)]
        embedding_model: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scribe=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match scribe_core::config::ScribeConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "config load failed");
            std::process::exit(1);
        }
    };

    let code = match args.command {
        Some(Command::Setup {
            server,
            on_failure,
            embedding_model,
        }) => app::setup(&config, &server, &on_failure, embedding_model.as_deref()),
        None => app::run(config).await,
    };
    std::process::exit(code);
}
