//! Postgres-backed `Ledger` (spec.md §4.4).
//!
//! Grounded on `TheOusia-ousia/ledger/adapters/postgres.rs`: one
//! `pool.begin()` transaction per public operation, row locks via
//! `SELECT ... FOR UPDATE`, and errors mapped through a single
//! `From<sqlx::Error>` impl rather than threading `sqlx::Error` through
//! the public API.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{AdminRefundResult, Ledger, RoundMeta, SettleCashoutResult};
use crate::domain::{Bet, BetStatus, CashoutOutcome, PaymentIntent, PaymentStatus, PaymentType};
use crate::error::{CoreError, CoreResult};
use crate::money::Money;

pub struct PostgresLedger {
    pool: sqlx::PgPool,
    max_round_age_seconds: i64,
}

impl PostgresLedger {
    pub fn new(pool: sqlx::PgPool, max_round_age_seconds: i64) -> Self {
        Self {
            pool,
            max_round_age_seconds,
        }
    }
}

#[async_trait]
impl Ledger for PostgresLedger {
    async fn place_bet(
        &self,
        user_id: Uuid,
        round_id: Uuid,
        amount: Money,
    ) -> CoreResult<(Uuid, Money)> {
        let mut tx = self.pool.begin().await?;

        let started_at: Option<chrono::DateTime<Utc>> =
            sqlx::query_scalar("SELECT started_at FROM rounds WHERE round_id = $1")
                .bind(round_id)
                .fetch_optional(&mut *tx)
                .await?;
        let started_at = started_at.ok_or_else(|| CoreError::NotFound("round".into()))?;
        let age = Utc::now().signed_duration_since(started_at);
        if age.num_seconds() > self.max_round_age_seconds {
            return Err(CoreError::RoundStale);
        }

        let existing_active: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM bets WHERE user_id = $1 AND round_id = $2 AND status = 'active'",
        )
        .bind(user_id)
        .bind(round_id)
        .fetch_optional(&mut *tx)
        .await?;
        if existing_active.is_some() {
            return Err(CoreError::Conflict("duplicate active bet".into()));
        }

        let new_balance: Option<rust_decimal::Decimal> = sqlx::query_scalar(
            "UPDATE users SET balance = balance - $1, updated_at = now() \
             WHERE id = $2 AND balance >= $1 RETURNING balance",
        )
        .bind(amount.as_decimal())
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let new_balance = new_balance.ok_or(CoreError::InsufficientFunds)?;

        let bet_id = Uuid::new_v4();
        // The partial unique index on (user_id, round_id) WHERE
        // status = 'active' is the real guard against two concurrent
        // callers both winning; this INSERT is what actually races.
        sqlx::query(
            r#"
            INSERT INTO bets (id, round_id, user_id, bet_amount, status, bet_placed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'active', now(), now(), now())
            "#,
        )
        .bind(bet_id)
        .bind(round_id)
        .bind(user_id)
        .bind(amount.as_decimal())
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                CoreError::Conflict("duplicate active bet".into())
            }
            _ => CoreError::from(e),
        })?;

        tx.commit().await?;
        Ok((bet_id, Money::new(new_balance)))
    }

    async fn settle_cashout(
        &self,
        user_id: Uuid,
        round_id: Uuid,
        engine_result: CashoutOutcome,
    ) -> CoreResult<SettleCashoutResult> {
        let mut tx = self.pool.begin().await?;

        let settlement_closed_at: Option<chrono::DateTime<Utc>> = sqlx::query_scalar(
            "SELECT settlement_closed_at FROM rounds WHERE round_id = $1 FOR UPDATE",
        )
        .bind(round_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::NotFound("round".into()))?;
        if let Some(closed_at) = settlement_closed_at {
            if closed_at < Utc::now() {
                return Err(CoreError::SettlementClosed);
            }
        }

        let bet: Option<Bet> = sqlx::query_as(
            "SELECT * FROM bets WHERE user_id = $1 AND round_id = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(round_id)
        .fetch_optional(&mut *tx)
        .await?;
        let bet = bet.ok_or_else(|| CoreError::NotFound("bet".into()))?;

        let current_balance: rust_decimal::Decimal =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        match bet.status {
            BetStatus::Cashed => {
                tx.commit().await?;
                return Ok(SettleCashoutResult {
                    payout: bet.payout.unwrap_or(Money::ZERO),
                    new_balance: Money::new(current_balance),
                    idempotent: true,
                });
            }
            BetStatus::Lost | BetStatus::Refunded => {
                tx.commit().await?;
                return Ok(SettleCashoutResult {
                    payout: Money::ZERO,
                    new_balance: Money::new(current_balance),
                    idempotent: true,
                });
            }
            BetStatus::Active => {}
        }

        if !engine_result.win {
            sqlx::query(
                "UPDATE bets SET status = 'lost', payout = 0, updated_at = now() WHERE id = $1",
            )
            .bind(bet.id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(SettleCashoutResult {
                payout: Money::ZERO,
                new_balance: Money::new(current_balance),
                idempotent: false,
            });
        }

        let new_balance: rust_decimal::Decimal = sqlx::query_scalar(
            "UPDATE users SET balance = balance + $1, updated_at = now() WHERE id = $2 RETURNING balance",
        )
        .bind(engine_result.payout.as_decimal())
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE bets SET status = 'cashed', payout = $1, claimed_at = now(), updated_at = now() WHERE id = $2",
        )
        .bind(engine_result.payout.as_decimal())
        .bind(bet.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(SettleCashoutResult {
            payout: engine_result.payout,
            new_balance: Money::new(new_balance),
            idempotent: false,
        })
    }

    async fn persist_round_start(&self, meta: RoundMeta) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rounds
                (round_id, commit_idx, server_seed_hash, crash_point, started_at, settlement_window_seconds)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (round_id) DO NOTHING
            "#,
        )
        .bind(meta.round_id)
        .bind(meta.commit_idx)
        .bind(&meta.server_seed_hash)
        .bind(meta.crash_point)
        .bind(meta.started_at)
        .bind(meta.settlement_window_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn persist_round_crash(&self, meta: RoundMeta, seed: Vec<u8>) -> CoreResult<()> {
        let ended_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE rounds
            SET crash_point = $1,
                ended_at = $2,
                server_seed = $3,
                settlement_closed_at = $2 + (settlement_window_seconds * interval '1 second')
            WHERE round_id = $4
            "#,
        )
        .bind(meta.crash_point)
        .bind(ended_at)
        .bind(&seed)
        .bind(meta.round_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn admin_refund(&self, bet_id: Uuid) -> CoreResult<AdminRefundResult> {
        let mut tx = self.pool.begin().await?;

        let bet: Option<Bet> = sqlx::query_as("SELECT * FROM bets WHERE id = $1 FOR UPDATE")
            .bind(bet_id)
            .fetch_optional(&mut *tx)
            .await?;
        let bet = bet.ok_or_else(|| CoreError::NotFound("bet".into()))?;

        match bet.status {
            BetStatus::Refunded => {
                let balance: rust_decimal::Decimal =
                    sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
                        .bind(bet.user_id)
                        .fetch_one(&mut *tx)
                        .await?;
                tx.commit().await?;
                Ok(AdminRefundResult {
                    refunded: false,
                    new_balance: Money::new(balance),
                })
            }
            BetStatus::Cashed => Err(CoreError::Conflict("bet already cashed".into())),
            BetStatus::Active | BetStatus::Lost => {
                let new_balance: rust_decimal::Decimal = sqlx::query_scalar(
                    "UPDATE users SET balance = balance + $1, updated_at = now() WHERE id = $2 RETURNING balance",
                )
                .bind(bet.bet_amount.as_decimal())
                .bind(bet.user_id)
                .fetch_one(&mut *tx)
                .await?;

                sqlx::query("UPDATE bets SET status = 'refunded', updated_at = now() WHERE id = $1")
                    .bind(bet_id)
                    .execute(&mut *tx)
                    .await?;

                tx.commit().await?;
                Ok(AdminRefundResult {
                    refunded: true,
                    new_balance: Money::new(new_balance),
                })
            }
        }
    }

    async fn get_bet(&self, bet_id: Uuid) -> CoreResult<Option<Bet>> {
        let bet = sqlx::query_as("SELECT * FROM bets WHERE id = $1")
            .bind(bet_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(bet)
    }

    async fn get_user_balance(&self, user_id: Uuid) -> CoreResult<Money> {
        let balance: rust_decimal::Decimal =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(Money::new(balance))
    }

    async fn credit_user(&self, user_id: Uuid, amount: Money) -> CoreResult<Money> {
        let new_balance: rust_decimal::Decimal = sqlx::query_scalar(
            "UPDATE users SET balance = balance + $1, updated_at = now() WHERE id = $2 RETURNING balance",
        )
        .bind(amount.as_decimal())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(Money::new(new_balance))
    }

    async fn debit_user(&self, user_id: Uuid, amount: Money) -> CoreResult<Money> {
        let new_balance: Option<rust_decimal::Decimal> = sqlx::query_scalar(
            "UPDATE users SET balance = balance - $1, updated_at = now() \
             WHERE id = $2 AND balance >= $1 RETURNING balance",
        )
        .bind(amount.as_decimal())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        new_balance
            .map(Money::new)
            .ok_or(CoreError::InsufficientFunds)
    }

    async fn create_deposit_intent(
        &self,
        user_id: Uuid,
        amount: Money,
        external_id: Uuid,
    ) -> CoreResult<PaymentIntent> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM payments WHERE user_id = $1 AND type = 'deposit' \
             AND status IN ('pending', 'processing')",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Err(CoreError::Conflict("pending deposit exists".into()));
        }

        let intent_id = Uuid::new_v4();
        let intent: PaymentIntent = sqlx::query_as(
            r#"
            INSERT INTO payments (id, user_id, type, amount, external_id, status, created_at, updated_at)
            VALUES ($1, $2, 'deposit', $3, $4, 'pending', now(), now())
            RETURNING *
            "#,
        )
        .bind(intent_id)
        .bind(user_id)
        .bind(amount.as_decimal())
        .bind(external_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                CoreError::Conflict("duplicate external_id".into())
            }
            _ => CoreError::from(e),
        })?;

        tx.commit().await?;
        Ok(intent)
    }

    async fn create_withdraw_intent(
        &self,
        user_id: Uuid,
        amount: Money,
        external_id: Uuid,
    ) -> CoreResult<PaymentIntent> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM payments WHERE user_id = $1 AND type = 'withdraw' \
             AND status IN ('pending', 'processing')",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Err(CoreError::Conflict("pending withdraw exists".into()));
        }

        let debited: Option<rust_decimal::Decimal> = sqlx::query_scalar(
            "UPDATE users SET balance = balance - $1, updated_at = now() \
             WHERE id = $2 AND balance >= $1 RETURNING balance",
        )
        .bind(amount.as_decimal())
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        if debited.is_none() {
            return Err(CoreError::InsufficientFunds);
        }

        let intent_id = Uuid::new_v4();
        let intent: PaymentIntent = sqlx::query_as(
            r#"
            INSERT INTO payments (id, user_id, type, amount, external_id, status, created_at, updated_at)
            VALUES ($1, $2, 'withdraw', $3, $4, 'processing', now(), now())
            RETURNING *
            "#,
        )
        .bind(intent_id)
        .bind(user_id)
        .bind(amount.as_decimal())
        .bind(external_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                CoreError::Conflict("duplicate external_id".into())
            }
            _ => CoreError::from(e),
        })?;

        tx.commit().await?;
        Ok(intent)
    }

    async fn set_gateway_txn_id(&self, intent_id: Uuid, gateway_txn_id: String) -> CoreResult<()> {
        sqlx::query("UPDATE payments SET gateway_txn_id = $1, updated_at = now() WHERE id = $2")
            .bind(gateway_txn_id)
            .bind(intent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail_intent_synchronously(
        &self,
        intent_id: Uuid,
        error_reason: String,
    ) -> CoreResult<PaymentIntent> {
        let mut tx = self.pool.begin().await?;

        let intent: Option<PaymentIntent> =
            sqlx::query_as("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
                .bind(intent_id)
                .fetch_optional(&mut *tx)
                .await?;
        let intent = intent.ok_or_else(|| CoreError::NotFound("payment intent".into()))?;

        if intent.status.is_terminal() {
            tx.commit().await?;
            return Ok(intent);
        }

        if intent.kind == PaymentType::Withdraw {
            sqlx::query("UPDATE users SET balance = balance + $1, updated_at = now() WHERE id = $2")
                .bind(intent.amount.as_decimal())
                .bind(intent.user_id)
                .execute(&mut *tx)
                .await?;
        }

        let updated: PaymentIntent = sqlx::query_as(
            "UPDATE payments SET status = 'failed', error_reason = $1, updated_at = now() \
             WHERE id = $2 RETURNING *",
        )
        .bind(error_reason)
        .bind(intent_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn get_payment_intent(&self, intent_id: Uuid) -> CoreResult<Option<PaymentIntent>> {
        let intent = sqlx::query_as("SELECT * FROM payments WHERE id = $1")
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(intent)
    }

    async fn claim_pollable_intents(
        &self,
        kind: PaymentType,
        limit: i64,
    ) -> CoreResult<Vec<PaymentIntent>> {
        let intents = sqlx::query_as(
            "SELECT * FROM payments WHERE type = $1 AND status IN ('pending', 'processing') \
             ORDER BY created_at ASC LIMIT $2",
        )
        .bind(kind)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(intents)
    }

    async fn transition_intent_terminal(
        &self,
        intent_id: Uuid,
        new_status: PaymentStatus,
        gateway_status: Option<String>,
        error_reason: Option<String>,
    ) -> CoreResult<PaymentIntent> {
        let mut tx = self.pool.begin().await?;

        let intent: Option<PaymentIntent> =
            sqlx::query_as("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
                .bind(intent_id)
                .fetch_optional(&mut *tx)
                .await?;
        let intent = intent.ok_or_else(|| CoreError::NotFound("payment intent".into()))?;

        if intent.status.is_terminal() {
            tx.commit().await?;
            return Ok(intent);
        }

        let should_credit_user = match (intent.kind, new_status) {
            (PaymentType::Deposit, PaymentStatus::Confirmed) => true,
            (PaymentType::Withdraw, PaymentStatus::Failed | PaymentStatus::Expired) => true,
            _ => false,
        };

        if should_credit_user {
            sqlx::query("UPDATE users SET balance = balance + $1, updated_at = now() WHERE id = $2")
                .bind(intent.amount.as_decimal())
                .bind(intent.user_id)
                .execute(&mut *tx)
                .await?;
        }

        let updated: PaymentIntent = sqlx::query_as(
            "UPDATE payments SET status = $1, gateway_status = $2, error_reason = $3, updated_at = now() \
             WHERE id = $4 RETURNING *",
        )
        .bind(new_status)
        .bind(gateway_status)
        .bind(error_reason)
        .bind(intent_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }
}
