//! C5 — Bet coordinator.
//!
//! Bridges the engine (in-process) and the ledger (remote storage) in two
//! phases, per spec.md §4.5: generalizes the teacher's escrow-then-record
//! shape in `instructions/crash.rs` (`join_handler` moves tokens into
//! escrow, then records round/participant state; `cashout_handler` updates
//! participant state, then moves the payout) into "lock the DB row, then
//! mutate the in-process engine" — keeping each failure mode precisely
//! recoverable instead of holding a DB transaction open across an
//! in-memory call.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::CashoutOutcome;
use crate::engine::EngineHandle;
use crate::error::{CoreError, CoreResult};
use crate::ledger::Ledger;
use crate::money::Money;
use crate::rate_limiter::RateLimiter;

pub struct BetCoordinator {
    ledger: Arc<dyn Ledger>,
    engine: EngineHandle,
    min_bet: Money,
    max_bet: Money,
    cashout_limiter: RateLimiter,
}

#[derive(Debug, Clone)]
pub struct PlaceBetOutcome {
    pub bet_id: Uuid,
    pub round_id: Uuid,
    pub server_seed_hash: Vec<u8>,
    pub balance: Money,
}

#[derive(Debug, Clone)]
pub struct CashoutResponse {
    pub success: bool,
    pub payout: Money,
    pub multiplier: rust_decimal::Decimal,
    pub balance: Money,
    pub idempotent: bool,
}

impl BetCoordinator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        engine: EngineHandle,
        min_bet: Money,
        max_bet: Money,
        cashout_min_interval: Duration,
        cashout_prune_age: Duration,
        max_cashout_entries: usize,
    ) -> Self {
        Self {
            ledger,
            engine,
            min_bet,
            max_bet,
            cashout_limiter: RateLimiter::new(cashout_min_interval, 1, cashout_prune_age, max_cashout_entries),
        }
    }

    /// Joins the engine first, then persists the debit against whichever
    /// round the engine actually put the player in — `round_id` is never
    /// taken from the caller (spec §6: `POST /bet` takes only the amount).
    pub async fn place_bet(&self, user_id: Uuid, amount: Money) -> CoreResult<PlaceBetOutcome> {
        if amount < self.min_bet || amount > self.max_bet {
            return Err(CoreError::Validation(format!(
                "bet amount must be between {} and {}",
                self.min_bet, self.max_bet
            )));
        }

        let ack = self.engine.join(user_id, amount).await?;

        match self.ledger.place_bet(user_id, ack.round_id, amount).await {
            Ok((bet_id, balance_after_debit)) => Ok(PlaceBetOutcome {
                bet_id,
                round_id: ack.round_id,
                server_seed_hash: ack.server_seed_hash,
                balance: balance_after_debit,
            }),
            Err(ledger_err) => {
                // Compensate: the engine already holds this join in
                // memory, so undo it before surfacing the ledger's
                // rejection rather than leaving a debit-less player in
                // the round.
                match self.engine.cancel_join(user_id, ack.round_id).await {
                    Ok(()) => {
                        tracing::warn!(
                            %user_id, round_id = %ack.round_id,
                            "ledger rejected bet after engine join; compensated by leaving the round"
                        );
                        Err(ledger_err)
                    }
                    Err(cancel_err) => {
                        tracing::error!(
                            %user_id, round_id = %ack.round_id,
                            ledger_error = %ledger_err,
                            cancel_error = %cancel_err,
                            "CRITICAL: ledger rejected a bet and compensating the engine join also failed; manual reconciliation required"
                        );
                        Err(CoreError::Internal(format!(
                            "bet rejected ({ledger_err}) and compensation failed ({cancel_err})"
                        )))
                    }
                }
            }
        }
    }

    /// `round_id` comes back from the engine's own cashout result, never
    /// from the caller (spec §6: `POST /cashout` takes no body).
    pub async fn cashout(&self, user_id: Uuid) -> CoreResult<CashoutResponse> {
        let result = self.cashout_limiter.check(user_id.to_string());
        if !result.allowed {
            return Err(CoreError::RateLimited {
                retry_after_ms: result.retry_after_ms,
            });
        }

        let engine_result: CashoutOutcome = self.engine.cashout(user_id).await?;
        let settled = self
            .ledger
            .settle_cashout(user_id, engine_result.round_id, engine_result)
            .await?;

        Ok(CashoutResponse {
            success: engine_result.win,
            payout: settled.payout,
            multiplier: engine_result.multiplier,
            balance: settled.new_balance,
            idempotent: settled.idempotent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, LifecycleEvent, RoundEngine};
    use crate::ledger::memory::InMemoryLedger;
    use crate::ledger::{Ledger, RoundMeta};
    use crate::seed_store::{InMemorySeedStore, SeedStore};
    use std::time::Duration as StdDuration;

    fn coordinator(ledger: Arc<InMemoryLedger>, engine: EngineHandle) -> BetCoordinator {
        BetCoordinator::new(
            ledger,
            engine,
            Money::from_i64_cents(100),
            Money::from_i64_cents(1_000_000),
            StdDuration::from_millis(1),
            StdDuration::from_secs(60),
            1_000,
        )
    }

    /// Spawns a live engine and mirrors its first `RoundStarted` into the
    /// given ledger, the way `main.rs`'s lifecycle task does, so the
    /// ledger recognizes the round the engine actually joins players into.
    async fn running_engine_with_ledger(ledger: &InMemoryLedger) -> (EngineHandle, Uuid) {
        let seed_store = Arc::new(InMemorySeedStore::new(Some("test-secret".into())));
        seed_store.ensure_next().await.unwrap();
        let (handle, mut lifecycle_rx) = RoundEngine::spawn(seed_store, EngineConfig::default());

        let round_id = match lifecycle_rx.recv().await.unwrap() {
            LifecycleEvent::Started(e) => {
                ledger
                    .persist_round_start(RoundMeta {
                        round_id: e.round_id,
                        commit_idx: e.commit_idx,
                        server_seed_hash: e.server_seed_hash,
                        crash_point: e.crash_point,
                        started_at: e.started_at,
                        settlement_window_seconds: e.settlement_window_seconds,
                    })
                    .await
                    .unwrap();
                e.round_id
            }
            LifecycleEvent::Crashed(_) => unreachable!("first event is always a start"),
        };
        (handle, round_id)
    }

    #[tokio::test]
    async fn place_bet_derives_round_id_from_the_engine_join() {
        let ledger: Arc<InMemoryLedger> = Arc::new(InMemoryLedger::new(300));
        let (engine, live_round_id) = running_engine_with_ledger(&ledger).await;
        let user = Uuid::new_v4();
        ledger.seed_balance(user, Money::from_i64_cents(10_000));
        let coordinator = coordinator(ledger.clone(), engine);

        let outcome = coordinator
            .place_bet(user, Money::from_i64_cents(500))
            .await
            .unwrap();

        assert_eq!(outcome.round_id, live_round_id);
        let bet = ledger.get_bet(outcome.bet_id).await.unwrap().unwrap();
        assert_eq!(bet.round_id, live_round_id);
    }

    #[tokio::test]
    async fn place_bet_compensates_engine_join_when_ledger_rejects() {
        let user = Uuid::new_v4();

        // No balance seeded: the ledger debit fails with InsufficientFunds
        // after the engine has already accepted the join.
        let empty_ledger: Arc<InMemoryLedger> = Arc::new(InMemoryLedger::new(300));
        let (engine, _round_id) = running_engine_with_ledger(&empty_ledger).await;
        let result = coordinator(empty_ledger, engine.clone())
            .place_bet(user, Money::from_i64_cents(500))
            .await;
        assert!(matches!(result, Err(CoreError::InsufficientFunds)));

        // The compensating cancel_join should have removed the player, so
        // a fresh bet for the same user in the same round is accepted on
        // a ledger that does have a balance.
        let funded_ledger: Arc<InMemoryLedger> = Arc::new(InMemoryLedger::new(300));
        let snapshot = engine.status().await.unwrap();
        funded_ledger
            .persist_round_start(RoundMeta {
                round_id: snapshot.round_id.unwrap(),
                commit_idx: snapshot.commit_idx,
                server_seed_hash: snapshot.server_seed_hash.clone().unwrap(),
                crash_point: snapshot.multiplier,
                started_at: snapshot.started_at.unwrap(),
                settlement_window_seconds: 300,
            })
            .await
            .unwrap();
        funded_ledger.seed_balance(user, Money::from_i64_cents(10_000));
        coordinator(funded_ledger, engine)
            .place_bet(user, Money::from_i64_cents(500))
            .await
            .unwrap();
    }
}
