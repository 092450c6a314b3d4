//! Integration tests spanning module boundaries: quoting and the
//! sniper-priority/conversion helpers that no single module's unit tests
//! exercise together.
//!
//! Run with: `cargo test --test integration_tests`

use migration_sniper_core::constants::{
    bps_to_fraction, lamports_to_sol, sol_to_lamports, BUY_EXECUTION_TOLERANCE_BPS, SOL_DECIMALS,
};
use migration_sniper_core::quote_engine::{self, PoolReserves};
use migration_sniper_core::types::{PositionStatus, SellReason, SniperConfig, SniperFilters};
use solana_sdk::pubkey::Pubkey;

fn dummy_pubkeys() -> (Pubkey, Pubkey, Pubkey, Pubkey, Pubkey, Pubkey) {
    (
        Pubkey::new_unique(),
        Pubkey::new_unique(),
        Pubkey::new_unique(),
        Pubkey::new_unique(),
        Pubkey::new_unique(),
        Pubkey::new_unique(),
    )
}

fn sniper_with_priority_fee(priority_fee: f64) -> SniperConfig {
    SniperConfig {
        id: "s1".into(),
        user: "u1".into(),
        wallet_id: "w1".into(),
        name: "test".into(),
        active: true,
        snipe_amount: 0.1,
        slippage_bps: 500,
        priority_fee,
        take_profit_pct: None,
        stop_loss_pct: None,
        trailing_stop_pct: None,
        cover_initials: None,
        mev_protected: true,
        filters: SniperFilters::default(),
    }
}

#[test]
fn buy_then_sell_quote_round_trips_within_tolerance() {
    let (mint, pool, base_vault, quote_vault, coin_creator, token_program) = dummy_pubkeys();
    let reserves = PoolReserves { token_reserve: 1_000_000_000_000, sol_reserve: 50_000_000_000 };

    let buy = quote_engine::quote_buy(
        mint,
        pool,
        base_vault,
        quote_vault,
        coin_creator,
        token_program,
        &reserves,
        sol_to_lamports(1.0),
    )
    .expect("buy quote");

    assert!(buy.expected_tokens > 0);
    assert!(buy.min_tokens_out <= buy.expected_tokens);
    let tolerance = bps_to_fraction(BUY_EXECUTION_TOLERANCE_BPS);
    let implied = 1.0 - (buy.min_tokens_out as f64 / buy.expected_tokens as f64);
    assert!((implied - tolerance).abs() < 0.0001);

    let post_buy_reserves = PoolReserves {
        token_reserve: reserves.token_reserve - buy.expected_tokens,
        sol_reserve: reserves.sol_reserve + sol_to_lamports(1.0),
    };

    let sell = quote_engine::quote_sell(
        mint,
        pool,
        base_vault,
        quote_vault,
        coin_creator,
        token_program,
        &post_buy_reserves,
        buy.expected_tokens,
        500,
    )
    .expect("sell quote");

    // Selling back what we just bought recovers less than the SOL spent:
    // the pool moved against us on both legs.
    assert!(lamports_to_sol(sell.expected_sol) < 1.0);
    assert!(sell.min_sol_out <= sell.expected_sol);
}

#[test]
fn sniper_job_priority_is_inversely_proportional_to_tip() {
    let low_tip = sniper_with_priority_fee(0.0001).job_priority();
    let mid_tip = sniper_with_priority_fee(0.005).job_priority();
    let high_tip = sniper_with_priority_fee(0.02).job_priority();

    assert!(low_tip > mid_tip);
    assert!(mid_tip > high_tip);
    assert!((1..=99).contains(&low_tip));
    assert!((1..=99).contains(&high_tip));
}

#[test]
fn position_status_and_sell_reason_are_distinguishable() {
    assert_ne!(PositionStatus::Open, PositionStatus::Selling);
    assert_ne!(PositionStatus::Selling, PositionStatus::Closed);
    assert_ne!(SellReason::TakeProfit, SellReason::StopLoss);
    assert_ne!(SellReason::Manual, SellReason::TrailingStop);
}

#[test]
fn sol_lamport_conversion_round_trips() {
    assert_eq!(sol_to_lamports(1.0), SOL_DECIMALS);
    assert_eq!(lamports_to_sol(SOL_DECIMALS), 1.0);

    let original = 3.14159;
    let round_tripped = lamports_to_sol(sol_to_lamports(original));
    assert!((original - round_tripped).abs() < 0.000001);
}
