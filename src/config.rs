//! Environment configuration.
//!
//! Loaded with `envy` over `std::env`, after an optional `.env` via
//! `dotenvy` — the same pairing `openibank-openibank`'s services use. Field
//! names match the environment variables named in spec.md §6 verbatim
//! (serde's default `SCREAMING_SNAKE_CASE` rename is not needed since envy
//! already upper-cases field names when matching).

use serde::Deserialize;

fn default_broadcast_interval_ms() -> u64 {
    100
}
fn default_request_timeout_ms() -> u64 {
    15_000
}
fn default_db_statement_timeout_ms() -> u64 {
    5_000
}
fn default_db_connection_timeout_ms() -> u64 {
    5_000
}
fn default_db_idle_timeout_ms() -> u64 {
    30_000
}
fn default_cashout_min_interval_ms() -> u64 {
    1_000
}
fn default_cashout_prune_age_ms() -> u64 {
    60_000
}
fn default_max_cashout_entries() -> usize {
    100_000
}
fn default_settlement_window_seconds() -> i64 {
    300
}
fn default_max_round_age_seconds() -> i64 {
    300
}
fn default_inter_round_gap_ms() -> u64 {
    5_000
}
fn default_poll_attempts() -> u32 {
    60
}
fn default_poll_interval_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    /// Master secret for deterministic seed derivation. Its absence
    /// degrades provable fairness across restarts (spec §4.1).
    pub seed_master: Option<String>,

    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_db_statement_timeout_ms")]
    pub db_statement_timeout_ms: u64,
    #[serde(default = "default_db_connection_timeout_ms")]
    pub db_connection_timeout_ms: u64,
    #[serde(default = "default_db_idle_timeout_ms")]
    pub db_idle_timeout_ms: u64,

    pub min_bet_amount: rust_decimal::Decimal,
    pub max_bet_amount: rust_decimal::Decimal,

    #[serde(default = "default_cashout_min_interval_ms")]
    pub cashout_min_interval_ms: u64,
    #[serde(default = "default_cashout_prune_age_ms")]
    pub cashout_prune_age_ms: u64,
    #[serde(default = "default_max_cashout_entries")]
    pub max_cashout_entries: usize,

    #[serde(default = "default_settlement_window_seconds")]
    pub settlement_window_seconds: i64,
    #[serde(default = "default_max_round_age_seconds")]
    pub max_round_age_seconds: i64,
    #[serde(default = "default_inter_round_gap_ms")]
    pub inter_round_gap_ms: u64,

    #[serde(default = "default_poll_attempts")]
    pub payment_poll_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub payment_poll_interval_ms: u64,

    pub deposit_gateway_base_url: String,
    pub withdraw_gateway_base_url: String,

    /// Refuses to run rounds without a valid seed commitment unless set
    /// (Open Question #2 in spec §9, resolved in DESIGN.md).
    #[serde(default)]
    pub allow_degraded_rounds: bool,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let cfg = envy::from_env::<Config>()?;
        Ok(cfg)
    }
}
