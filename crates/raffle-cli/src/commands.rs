use anyhow::{bail, Context};
use colored::Colorize;
use raffle_chain::{LedgerClient, LedgerTransaction, RpcLedgerClient};
use raffle_server::{AppConfig, RaffleServer};
use raffle_types::TxSignature;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Serve(args) => cmd_serve(config, args),
        Command::Config => cmd_config(&config),
        Command::Inspect(args) => cmd_inspect(config, args, &cli.format),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    match &cli.config {
        Some(path) => AppConfig::load(path).with_context(|| format!("reading {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("starting async runtime")
}

fn cmd_serve(mut config: AppConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if args.no_sweep {
        config.sweep.enabled = false;
    }
    if config.verifier.rpc_url.is_none() || config.verifier.treasury_wallet.is_none() {
        println!(
            "{} ledger endpoint or treasury wallet unset; every verification will fail",
            "warning:".yellow().bold()
        );
    }
    if config.server.admin_token.is_none() {
        println!("{} no admin token; admin endpoints are disabled", "warning:".yellow().bold());
    }
    println!("Raffle server on {}", config.server.bind_addr.to_string().bold());
    runtime()?.block_on(RaffleServer::new(config).serve())?;
    Ok(())
}

fn cmd_config(config: &AppConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

fn cmd_inspect(config: AppConfig, args: InspectArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let signature = TxSignature::parse(&args.signature)?;
    let Some(endpoint) = args.rpc_url.or(config.verifier.rpc_url.clone()) else {
        bail!("no ledger endpoint: set verifier.rpc_url or pass --rpc-url");
    };
    let client = RpcLedgerClient::new(endpoint, config.verifier.request_timeout())?;

    let found = runtime()?.block_on(client.get_transaction(&signature, config.verifier.commitment))?;
    let Some(tx) = found else {
        println!("{} {} not found at {} commitment", "✗".red(), signature.short().yellow(), config.verifier.commitment.as_str());
        return Ok(());
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tx)?),
        OutputFormat::Text => print_transaction(&tx, config.verifier.treasury_wallet.as_deref()),
    }
    Ok(())
}

fn print_transaction(tx: &LedgerTransaction, treasury: Option<&str>) {
    let status = if tx.failed { "failed".red().bold() } else { "succeeded".green().bold() };
    println!("Transaction {} {}", tx.signature.short().yellow(), status);
    println!("  Fee payer:  {}", tx.fee_payer().unwrap_or("-").cyan());
    match tx.block_time {
        Some(at) => println!("  Block time: {}", at.to_rfc3339()),
        None => println!("  Block time: {}", "unknown".dimmed()),
    }

    for (index, key) in tx.account_keys.iter().enumerate() {
        let Some(delta) = tx.native_delta(key) else { continue };
        if delta == 0 {
            continue;
        }
        let marker = if Some(key.as_str()) == treasury { " (treasury)".green().to_string() } else { String::new() };
        let amount = if delta > 0 { format!("+{delta}").green() } else { delta.to_string().red() };
        println!("  [{index}] {key}{marker}: {amount} lamports");
    }
    for change in &tx.token_balances {
        let owner = change.owner.as_deref().unwrap_or("-");
        let delta = match change.delta() {
            Some(delta) => delta.to_string(),
            None => format!("{} -> {}", change.pre, change.post),
        };
        println!(
            "  token {} owner {}: {} raw units ({} decimals)",
            change.mint.dimmed(),
            owner,
            delta,
            change.decimals
        );
    }
}
