//! chatrelay - Streaming chat-completion relay
//!
//! A small server that forwards client chat requests to an OpenRouter-style
//! completions API and streams the response back line by line.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatrelay::config::Config;
use chatrelay::proxy::run_server;

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "Streaming chat-completion relay for OpenRouter-style APIs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration and report how the API key was resolved
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatrelay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = %config, "Loading configuration");
            let (mut config, key_source) = Config::load(&config)?;
            tracing::info!(key_source = %key_source, "Resolved upstream API key");

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            run_server(config).await
        }

        Commands::Check { config } => {
            let (config, key_source) = Config::load(&config)?;
            println!("configuration OK");
            println!("  listen:        {}", config.server.listen);
            println!("  upstream url:  {}", config.upstream.url);
            println!("  default model: {}", config.upstream.default_model);
            println!("  api key:       {}", key_source);
            Ok(())
        }
    }
}
