//! Persisted entities, carrying the invariants from spec.md §3.
//!
//! Grounded on the teacher's `state.rs` account structs (`GameState`,
//! `RoundState`, `RoundParticipant`, `PlayerBet`) — restructured around the
//! spec's entities (`User`, `Round`, `SeedCommit`, `Bet`, `PaymentIntent`)
//! instead of Anchor's PDAs, with the teacher's `Default`-impl-for-config
//! pattern reused for `EngineConfig`/`LedgerConfig`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::{Money, NonNegativeMoney};

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub phone: String,
    pub password_hash: String,
    pub balance: NonNegativeMoney,
    pub external_payment_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum RoundStatus {
    Running,
    Crashed,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Round {
    pub round_id: Uuid,
    /// Ordinal into the seed chain. Null only in a degraded boot where no
    /// commitment was available and `allow_degraded_rounds` was set.
    pub commit_idx: Option<i64>,
    pub server_seed_hash: Vec<u8>,
    pub server_seed: Option<Vec<u8>>,
    pub crash_point: rust_decimal::Decimal,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub settlement_window_seconds: i64,
    pub settlement_closed_at: Option<DateTime<Utc>>,
}

impl Round {
    pub fn is_settlement_closed(&self, now: DateTime<Utc>) -> bool {
        self.settlement_closed_at.map(|t| now >= t).unwrap_or(false)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct SeedCommit {
    pub idx: i64,
    pub seed_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum BetStatus {
    Active,
    Cashed,
    Lost,
    Refunded,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Bet {
    pub id: Uuid,
    pub round_id: Uuid,
    pub user_id: Uuid,
    pub bet_amount: Money,
    pub payout: Option<Money>,
    pub status: BetStatus,
    pub bet_placed_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum PaymentType {
    Deposit,
    Withdraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Confirmed,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Confirmed | PaymentStatus::Failed | PaymentStatus::Expired
        )
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(rename = "type")]
    pub kind: PaymentType,
    pub amount: Money,
    pub external_id: Uuid,
    pub gateway_txn_id: Option<String>,
    pub status: PaymentStatus,
    pub gateway_status: Option<String>,
    pub error_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of an `EngineHandle::cashout` call, handed to the ledger's
/// `settle_cashout` as-is (spec §4.2/§4.4).
#[derive(Debug, Clone, Copy)]
pub struct CashoutOutcome {
    pub round_id: Uuid,
    pub win: bool,
    pub multiplier: rust_decimal::Decimal,
    pub payout: Money,
}

/// Public, read-only snapshot of the engine's current round (C3's input).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundStatusSnapshot {
    pub round_id: Option<Uuid>,
    pub status: Option<RoundStatus>,
    pub multiplier: rust_decimal::Decimal,
    pub started_at: Option<DateTime<Utc>>,
    pub commit_idx: Option<i64>,
    pub server_seed_hash: Option<Vec<u8>>,
}
