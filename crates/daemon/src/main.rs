use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tracing::error;

use harbor_backend::EchoBackend;
use harbor_daemon::cli::{Cli, Commands};
use harbor_daemon::config::DaemonConfig;
use harbor_daemon::supervisor;

#[tokio::main]
async fn main() {
    dotenv().ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start => {
            let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());
            supervisor::init_logging(&level);

            let config = match DaemonConfig::from_env() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("❌ {e}");
                    std::process::exit(1);
                }
            };

            // The built-in backend provisions nothing; deployments swap in a
            // concrete ServiceBackend here.
            let backend = Arc::new(EchoBackend);

            match supervisor::run_daemon(config, backend).await {
                Ok(code) => std::process::exit(code),
                Err(e) => {
                    error!("Fatal startup error: {}", e);
                    eprintln!("❌ {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Keypair => {
            let keypair = harbor_chain::keypair::generate_keypair();
            println!("Private key: {}", keypair.private_key);
            println!("Address:     {:#x}", keypair.address);
        }
    }
}
