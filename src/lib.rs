//! Migration-triggered sniping pipeline for Solana launchpad tokens.
//!
//! Detects bonding-curve-to-AMM migration events, matches them against
//! user-configured snipers, executes buys through a fixed submission
//! schedule, and monitors open positions for take-profit/stop-loss/
//! trailing-stop exits.

pub mod blockhash_cache;
pub mod circuit_breaker;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod external_adapter;
pub mod kv_store;
pub mod migration_detector;
pub mod orchestrator;
pub mod persistence;
pub mod pool_resolver;
pub mod position_monitor;
pub mod quote_engine;
pub mod snipe_worker;
pub mod submission_engine;
pub mod tx_builder;
pub mod types;
pub mod wallet_lock;
pub mod wallet_manager;

pub use config::AppConfig;
pub use errors::{CoreError, CoreResult};
pub use events::{EventBus, UserEvent};
pub use external_adapter::ExternalAdapter;
pub use kv_store::KvStore;
pub use migration_detector::MigrationDetector;
pub use orchestrator::Orchestrator;
pub use persistence::Persistence;
pub use pool_resolver::PoolResolver;
pub use position_monitor::{PositionMonitor, SellRequest};
pub use snipe_worker::SnipeWorker;
pub use types::{
    AttemptStep, BuyQuote, ExecutionFees, ExecutionResult, Migration, Position, PositionStatus,
    SellQuote, SellReason, SniperConfig, SniperFilters, SnipeJob, SubmissionPath,
};
pub use wallet_lock::WalletLock;
pub use wallet_manager::{EncryptedWallet, WalletManager};
