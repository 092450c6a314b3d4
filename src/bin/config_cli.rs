//! Operator CLI: wallet provisioning and sniper configuration management
//! against the same SQLite store the pipeline reads at runtime.
//!
//! One subcommand per operation, each a single invocation rather than
//! an interactive session.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use migration_sniper_core::types::SniperFilters;
use migration_sniper_core::{Persistence, SniperConfig, WalletManager};
use solana_sdk::signature::{Keypair, Signer};
use std::io::{self, Write};

#[derive(Parser)]
#[command(name = "config_cli", about = "Operator tooling for the migration-sniper pipeline")]
struct Cli {
    #[arg(long, env = "DATABASE_PATH", default_value = "data/sniper.db")]
    database_path: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new keypair, encrypt it under the master password, and store it.
    GenerateWallet {
        #[arg(long)]
        wallet_id: String,
    },
    /// Print the public key for a stored wallet (requires the master password to decrypt).
    ShowWallet {
        #[arg(long)]
        wallet_id: String,
    },
    /// Register a new sniper for a user against an already-provisioned wallet.
    AddSniper {
        #[arg(long)]
        user: String,
        #[arg(long)]
        wallet_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        snipe_amount: f64,
        #[arg(long, default_value_t = 500)]
        slippage_bps: u64,
        #[arg(long, default_value_t = 0.001)]
        priority_fee: f64,
        #[arg(long)]
        min_liquidity: Option<f64>,
        #[arg(long)]
        max_mcap: Option<f64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();
    let persistence = Persistence::open(&cli.database_path).context("opening database")?;

    match cli.command {
        Command::GenerateWallet { wallet_id } => {
            let password = prompt_password("master encryption password: ")?;
            let wallet_manager = WalletManager::new(&password);
            let keypair = Keypair::new();
            let encrypted = wallet_manager.encrypt_wallet(&wallet_id, &keypair)?;
            persistence.insert_wallet(&encrypted)?;
            println!("✅ wallet {wallet_id} provisioned, public key: {}", encrypted.public_key);
        }
        Command::ShowWallet { wallet_id } => {
            let password = prompt_password("master encryption password: ")?;
            let wallet_manager = WalletManager::new(&password);
            let encrypted = persistence.load_wallet(&wallet_id)?;
            let keypair = wallet_manager.decrypt_wallet(&encrypted)?;
            println!("wallet {wallet_id}: {}", keypair.pubkey());
        }
        Command::AddSniper {
            user,
            wallet_id,
            name,
            snipe_amount,
            slippage_bps,
            priority_fee,
            min_liquidity,
            max_mcap,
        } => {
            let sniper = SniperConfig {
                id: uuid::Uuid::new_v4().to_string(),
                user,
                wallet_id,
                name,
                active: true,
                snipe_amount,
                slippage_bps,
                priority_fee,
                take_profit_pct: None,
                stop_loss_pct: None,
                trailing_stop_pct: None,
                cover_initials: None,
                mev_protected: true,
                filters: SniperFilters {
                    min_liquidity,
                    max_mcap,
                    ..Default::default()
                },
            };
            persistence.insert_sniper(&sniper)?;
            println!("✅ sniper {} registered for user {}", sniper.id, sniper.user);
        }
    }

    Ok(())
}

fn prompt_password(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
