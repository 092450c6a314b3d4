//! Operator utility: decrypt a stored wallet and report its live SOL
//! balance against the configured RPC endpoint.

use anyhow::{Context, Result};
use clap::Parser;
use migration_sniper_core::{Persistence, WalletManager};
use solana_client::rpc_client::RpcClient;
use solana_sdk::signature::Signer;
use std::io::{self, Write};

#[derive(Parser)]
struct Cli {
    #[arg(long, env = "DATABASE_PATH", default_value = "data/sniper.db")]
    database_path: String,

    #[arg(long, env = "RPC_PRIMARY_URL")]
    rpc_url: String,

    #[arg(long)]
    wallet_id: String,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let persistence = Persistence::open(&cli.database_path).context("opening database")?;
    let encrypted = persistence.load_wallet(&cli.wallet_id).context("loading wallet")?;

    print!("master encryption password: ");
    io::stdout().flush()?;
    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    let wallet_manager = WalletManager::new(password.trim());

    let keypair = wallet_manager.decrypt_wallet(&encrypted).context("decrypting wallet")?;
    let pubkey = keypair.pubkey();
    println!("📍 wallet {}: {}", cli.wallet_id, pubkey);

    let rpc = RpcClient::new(cli.rpc_url);
    let balance_lamports = rpc.get_balance(&pubkey).context("fetching balance")?;
    let balance_sol = balance_lamports as f64 / 1_000_000_000.0;
    println!("💰 {:.9} SOL ({} lamports)", balance_sol, balance_lamports);

    Ok(())
}
