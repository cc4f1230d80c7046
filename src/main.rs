use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use companion::secrets::{KeySlot, KeyStore};
use companion::{config, gateway};

#[derive(Parser)]
#[command(name = "companion")]
#[command(about = "A multi-persona AI companion chat runtime")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Gateway {
        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Auth token (required for non-loopback)
        #[arg(long, env = "COMPANION_TOKEN")]
        token: Option<String>,
    },

    /// Manage stored API keys
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Show configuration status
    Status,
}

#[derive(Subcommand)]
enum KeyAction {
    /// Store a key for openai, proxy, store, image or transcription
    Set { slot: KeySlot, key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Gateway { port, bind, token } => {
            let mut config = config::load()?;
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(bind) = bind {
                config.gateway.bind = bind;
            }
            gateway::run(config, token).await
        }
        Commands::Key { action } => match action {
            KeyAction::Set { slot, key } => {
                let path = KeyStore::locate().write(slot, &key)?;
                println!("stored {slot} key at {}", path.display());
                Ok(())
            }
        },
        Commands::Status => {
            let config = config::load()?;
            println!("companion v{}", env!("CARGO_PKG_VERSION"));
            println!("config: {}", config::config_path().display());
            println!("store: {}", config.store.kind);
            println!(
                "router: {}",
                config.router.endpoint.as_deref().unwrap_or("fallback only")
            );
            println!(
                "summary: {}",
                config.summary.endpoint.as_deref().unwrap_or("fallback only")
            );
            let stored = KeyStore::locate().stored();
            for slot in KeySlot::ALL {
                let state = if stored.contains(&slot) { "stored" } else { "-" };
                println!("key {slot}: {state}");
            }
            Ok(())
        }
    }
}
