use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "raffle", about = "Raffle ticket confirmation service", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server and the pending-claim sweep
    Serve(ServeArgs),
    /// Print the effective configuration as TOML
    Config,
    /// Look up a transaction on the configured ledger
    Inspect(InspectArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Override `server.bind_addr`
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Run without the background sweep
    #[arg(long)]
    pub no_sweep: bool,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Transaction signature (base58)
    pub signature: String,
    /// Override `verifier.rpc_url`
    #[arg(long)]
    pub rpc_url: Option<String>,
}
