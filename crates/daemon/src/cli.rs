use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "harbord",
    about = "Provider daemon for the harbor on-chain service marketplace",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the provider daemon (configuration comes from the environment)
    Start,
    /// Generate a fresh wallet keypair for an operator or billing identity
    Keypair,
}
