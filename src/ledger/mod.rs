//! C4 — Ledger.
//!
//! Every operation here executes inside a single transaction; partial
//! effects are impossible (spec.md §4.4). Grounded on
//! `TheOusia-ousia`'s ledger-adapter trait split (a storage-agnostic trait,
//! a Postgres adapter, row-locked transactions) and
//! `reecen9696-atomiq-bet-settlement`'s repository-trait shape.

pub mod memory;
pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Bet, CashoutOutcome, PaymentIntent, PaymentStatus, PaymentType};
use crate::error::CoreResult;
use crate::money::Money;

pub use postgres::PostgresLedger;

/// What the engine hands the ledger when it authors a round (spec §4.4:
/// "the engine authors Round creation/mutation through Ledger").
#[derive(Debug, Clone)]
pub struct RoundMeta {
    pub round_id: Uuid,
    pub commit_idx: Option<i64>,
    pub server_seed_hash: Vec<u8>,
    pub crash_point: rust_decimal::Decimal,
    pub started_at: DateTime<Utc>,
    pub settlement_window_seconds: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct SettleCashoutResult {
    pub payout: Money,
    pub new_balance: Money,
    pub idempotent: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct AdminRefundResult {
    pub refunded: bool,
    pub new_balance: Money,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Atomic conditional debit + bet insert. Fails with `RoundStale` if
    /// the round is older than `MAX_ROUND_AGE`, `Conflict` on a duplicate
    /// active bet, `InsufficientFunds` on a zero-row conditional debit.
    async fn place_bet(
        &self,
        user_id: Uuid,
        round_id: Uuid,
        amount: Money,
    ) -> CoreResult<(Uuid, Money)>;

    /// Idempotent: repeated calls for an already-settled bet return the
    /// original outcome without mutation (spec §8, property 5).
    async fn settle_cashout(
        &self,
        user_id: Uuid,
        round_id: Uuid,
        engine_result: CashoutOutcome,
    ) -> CoreResult<SettleCashoutResult>;

    async fn persist_round_start(&self, meta: RoundMeta) -> CoreResult<()>;

    async fn persist_round_crash(&self, meta: RoundMeta, seed: Vec<u8>) -> CoreResult<()>;

    async fn admin_refund(&self, bet_id: Uuid) -> CoreResult<AdminRefundResult>;

    async fn get_bet(&self, bet_id: Uuid) -> CoreResult<Option<Bet>>;

    async fn get_user_balance(&self, user_id: Uuid) -> CoreResult<Money>;

    /// Atomic credit used by the payment reconciler (C6) on a confirmed
    /// deposit or a refunded/failed withdrawal. Guarded by the caller
    /// holding the intent's row lock, so this alone is not the idempotency
    /// boundary — the reconciler's status read-then-transition is.
    async fn credit_user(&self, user_id: Uuid, amount: Money) -> CoreResult<Money>;

    /// Atomic conditional debit used by the payment reconciler when a
    /// withdrawal intent moves `pending -> processing`.
    async fn debit_user(&self, user_id: Uuid, amount: Money) -> CoreResult<Money>;

    /// Creates a `deposit` intent in `pending`. Fails with `Conflict` if the
    /// user already has a non-terminal deposit intent (spec §6, 409
    /// pending-deposit-exists).
    async fn create_deposit_intent(
        &self,
        user_id: Uuid,
        amount: Money,
        external_id: Uuid,
    ) -> CoreResult<PaymentIntent>;

    /// Creates a `withdraw` intent, atomically debiting the user and
    /// recording it as `processing` in the same transaction (spec §4.6).
    /// Fails with `Conflict` on an existing non-terminal withdraw intent,
    /// `InsufficientFunds` on a zero-row conditional debit.
    async fn create_withdraw_intent(
        &self,
        user_id: Uuid,
        amount: Money,
        external_id: Uuid,
    ) -> CoreResult<PaymentIntent>;

    /// Records the gateway's transaction id once the outbound call returns.
    async fn set_gateway_txn_id(&self, intent_id: Uuid, gateway_txn_id: String) -> CoreResult<()>;

    /// Synchronous-rejection path: the gateway call itself failed before a
    /// `gateway_txn_id` was ever issued. Marks `failed` and, for a
    /// withdrawal, reverses the debit in the same transaction.
    async fn fail_intent_synchronously(
        &self,
        intent_id: Uuid,
        error_reason: String,
    ) -> CoreResult<PaymentIntent>;

    async fn get_payment_intent(&self, intent_id: Uuid) -> CoreResult<Option<PaymentIntent>>;

    /// Intents the background poller should still be polling, oldest first.
    async fn claim_pollable_intents(
        &self,
        kind: PaymentType,
        limit: i64,
    ) -> CoreResult<Vec<PaymentIntent>>;

    /// Row-locked idempotent terminal transition (spec §4.6). Re-reads the
    /// current status under lock and returns it unchanged if already
    /// terminal; otherwise applies the balance effect for the transition
    /// (credit on deposit-confirmed, refund on withdraw-failed/expired, no
    /// effect on deposit-failed/expired or withdraw-confirmed) and records
    /// `gateway_status`/`error_reason`.
    async fn transition_intent_terminal(
        &self,
        intent_id: Uuid,
        new_status: PaymentStatus,
        gateway_status: Option<String>,
        error_reason: Option<String>,
    ) -> CoreResult<PaymentIntent>;
}
