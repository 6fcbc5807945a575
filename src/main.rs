use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ipoe::{Backends, Config, Registry, Result, UdpTransport};

#[derive(Parser)]
#[command(name = "ipoe")]
#[command(author, version, about = "IPoE session controller driven by DHCP", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "ipoe.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting IPoE session controller with config: {:?}", cli.config);
            let backends = Backends::from_config(&config);
            let registry = Registry::new(&config, backends, Arc::new(UdpTransport))?;
            registry.reconcile(&config.interfaces).await;
            let interfaces = registry.interfaces().await;
            info!(?interfaces, "ready");

            tokio::signal::ctrl_c().await?;
            info!("Received shutdown signal, terminating sessions...");
            registry.shutdown().await;
            info!("Final statistics: {}", registry.stats());
            Ok(())
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
