//! In-memory `Ledger` used by unit tests for the engine and coordinator.
//!
//! Same repository-trait-plus-fake-adapter shape as
//! `reecen9696-atomiq-bet-settlement` (swap the adapter, keep the trait);
//! this fake reimplements the same locking discipline as
//! `PostgresLedger` using a single `parking_lot::Mutex` over plain maps
//! instead of row locks, since there is exactly one process to race
//! against in a test.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{AdminRefundResult, Ledger, RoundMeta, SettleCashoutResult};
use crate::domain::{Bet, BetStatus, CashoutOutcome, PaymentIntent, PaymentStatus, PaymentType, Round};
use crate::error::{CoreError, CoreResult};
use crate::money::Money;

struct State {
    balances: HashMap<Uuid, Money>,
    bets: HashMap<Uuid, Bet>,
    rounds: HashMap<Uuid, Round>,
    payments: HashMap<Uuid, PaymentIntent>,
}

pub struct InMemoryLedger {
    state: Mutex<State>,
    max_round_age_seconds: i64,
}

impl InMemoryLedger {
    pub fn new(max_round_age_seconds: i64) -> Self {
        Self {
            state: Mutex::new(State {
                balances: HashMap::new(),
                bets: HashMap::new(),
                rounds: HashMap::new(),
                payments: HashMap::new(),
            }),
            max_round_age_seconds,
        }
    }

    pub fn seed_balance(&self, user_id: Uuid, balance: Money) {
        self.state.lock().balances.insert(user_id, balance);
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn place_bet(
        &self,
        user_id: Uuid,
        round_id: Uuid,
        amount: Money,
    ) -> CoreResult<(Uuid, Money)> {
        let mut state = self.state.lock();

        let started_at = state
            .rounds
            .get(&round_id)
            .map(|r| r.started_at)
            .ok_or_else(|| CoreError::NotFound("round".into()))?;
        if Utc::now().signed_duration_since(started_at).num_seconds() > self.max_round_age_seconds {
            return Err(CoreError::RoundStale);
        }

        let has_active = state
            .bets
            .values()
            .any(|b| b.user_id == user_id && b.round_id == round_id && b.status == BetStatus::Active);
        if has_active {
            return Err(CoreError::Conflict("duplicate active bet".into()));
        }

        let balance = state.balances.entry(user_id).or_insert(Money::ZERO);
        let new_balance = balance
            .checked_sub(amount)
            .filter(|b| !b.is_negative())
            .ok_or(CoreError::InsufficientFunds)?;
        *balance = new_balance;

        let bet_id = Uuid::new_v4();
        let now = Utc::now();
        state.bets.insert(
            bet_id,
            Bet {
                id: bet_id,
                round_id,
                user_id,
                bet_amount: amount,
                payout: None,
                status: BetStatus::Active,
                bet_placed_at: now,
                claimed_at: None,
                created_at: now,
                updated_at: now,
            },
        );

        Ok((bet_id, new_balance))
    }

    async fn settle_cashout(
        &self,
        user_id: Uuid,
        round_id: Uuid,
        engine_result: CashoutOutcome,
    ) -> CoreResult<SettleCashoutResult> {
        let mut state = self.state.lock();

        if let Some(round) = state.rounds.get(&round_id) {
            if round.is_settlement_closed(Utc::now()) {
                return Err(CoreError::SettlementClosed);
            }
        }

        let bet_id = state
            .bets
            .values()
            .find(|b| b.user_id == user_id && b.round_id == round_id)
            .map(|b| b.id)
            .ok_or_else(|| CoreError::NotFound("bet".into()))?;

        let status = state.bets[&bet_id].status;
        let current_balance = *state.balances.entry(user_id).or_insert(Money::ZERO);

        match status {
            BetStatus::Cashed => {
                let payout = state.bets[&bet_id].payout.unwrap_or(Money::ZERO);
                return Ok(SettleCashoutResult {
                    payout,
                    new_balance: current_balance,
                    idempotent: true,
                });
            }
            BetStatus::Lost | BetStatus::Refunded => {
                return Ok(SettleCashoutResult {
                    payout: Money::ZERO,
                    new_balance: current_balance,
                    idempotent: true,
                });
            }
            BetStatus::Active => {}
        }

        if !engine_result.win {
            let bet = state.bets.get_mut(&bet_id).unwrap();
            bet.status = BetStatus::Lost;
            bet.payout = Some(Money::ZERO);
            bet.updated_at = Utc::now();
            return Ok(SettleCashoutResult {
                payout: Money::ZERO,
                new_balance: current_balance,
                idempotent: false,
            });
        }

        let new_balance = current_balance
            .checked_add(engine_result.payout)
            .unwrap_or(current_balance);
        state.balances.insert(user_id, new_balance);

        let bet = state.bets.get_mut(&bet_id).unwrap();
        bet.status = BetStatus::Cashed;
        bet.payout = Some(engine_result.payout);
        bet.claimed_at = Some(Utc::now());
        bet.updated_at = Utc::now();

        Ok(SettleCashoutResult {
            payout: engine_result.payout,
            new_balance,
            idempotent: false,
        })
    }

    async fn persist_round_start(&self, meta: RoundMeta) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.rounds.entry(meta.round_id).or_insert(Round {
            round_id: meta.round_id,
            commit_idx: meta.commit_idx,
            server_seed_hash: meta.server_seed_hash,
            server_seed: None,
            crash_point: meta.crash_point,
            started_at: meta.started_at,
            ended_at: None,
            settlement_window_seconds: meta.settlement_window_seconds,
            settlement_closed_at: None,
        });
        Ok(())
    }

    async fn persist_round_crash(&self, meta: RoundMeta, seed: Vec<u8>) -> CoreResult<()> {
        let mut state = self.state.lock();
        if let Some(round) = state.rounds.get_mut(&meta.round_id) {
            let ended_at = Utc::now();
            round.crash_point = meta.crash_point;
            round.ended_at = Some(ended_at);
            round.server_seed = Some(seed);
            round.settlement_closed_at =
                Some(ended_at + chrono::Duration::seconds(round.settlement_window_seconds));
        }
        Ok(())
    }

    async fn admin_refund(&self, bet_id: Uuid) -> CoreResult<AdminRefundResult> {
        let mut state = self.state.lock();
        let status = state
            .bets
            .get(&bet_id)
            .map(|b| b.status)
            .ok_or_else(|| CoreError::NotFound("bet".into()))?;

        match status {
            BetStatus::Refunded => {
                let user_id = state.bets[&bet_id].user_id;
                let balance = *state.balances.entry(user_id).or_insert(Money::ZERO);
                Ok(AdminRefundResult {
                    refunded: false,
                    new_balance: balance,
                })
            }
            BetStatus::Cashed => Err(CoreError::Conflict("bet already cashed".into())),
            BetStatus::Active | BetStatus::Lost => {
                let (user_id, amount) = {
                    let bet = &state.bets[&bet_id];
                    (bet.user_id, bet.bet_amount)
                };
                let balance = state.balances.entry(user_id).or_insert(Money::ZERO);
                *balance = balance.checked_add(amount).unwrap_or(*balance);
                let new_balance = *balance;

                let bet = state.bets.get_mut(&bet_id).unwrap();
                bet.status = BetStatus::Refunded;
                bet.updated_at = Utc::now();

                Ok(AdminRefundResult {
                    refunded: true,
                    new_balance,
                })
            }
        }
    }

    async fn get_bet(&self, bet_id: Uuid) -> CoreResult<Option<Bet>> {
        Ok(self.state.lock().bets.get(&bet_id).cloned())
    }

    async fn get_user_balance(&self, user_id: Uuid) -> CoreResult<Money> {
        Ok(*self.state.lock().balances.entry(user_id).or_insert(Money::ZERO))
    }

    async fn credit_user(&self, user_id: Uuid, amount: Money) -> CoreResult<Money> {
        let mut state = self.state.lock();
        let balance = state.balances.entry(user_id).or_insert(Money::ZERO);
        *balance = balance.checked_add(amount).unwrap_or(*balance);
        Ok(*balance)
    }

    async fn debit_user(&self, user_id: Uuid, amount: Money) -> CoreResult<Money> {
        let mut state = self.state.lock();
        let balance = state.balances.entry(user_id).or_insert(Money::ZERO);
        let new_balance = balance
            .checked_sub(amount)
            .filter(|b| !b.is_negative())
            .ok_or(CoreError::InsufficientFunds)?;
        *balance = new_balance;
        Ok(new_balance)
    }

    async fn create_deposit_intent(
        &self,
        user_id: Uuid,
        amount: Money,
        external_id: Uuid,
    ) -> CoreResult<PaymentIntent> {
        let mut state = self.state.lock();
        let has_pending = state.payments.values().any(|p| {
            p.user_id == user_id && p.kind == PaymentType::Deposit && !p.status.is_terminal()
        });
        if has_pending {
            return Err(CoreError::Conflict("pending deposit exists".into()));
        }

        let now = Utc::now();
        let intent = PaymentIntent {
            id: Uuid::new_v4(),
            user_id,
            kind: PaymentType::Deposit,
            amount,
            external_id,
            gateway_txn_id: None,
            status: PaymentStatus::Pending,
            gateway_status: None,
            error_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.payments.insert(intent.id, intent.clone());
        Ok(intent)
    }

    async fn create_withdraw_intent(
        &self,
        user_id: Uuid,
        amount: Money,
        external_id: Uuid,
    ) -> CoreResult<PaymentIntent> {
        let mut state = self.state.lock();
        let has_pending = state.payments.values().any(|p| {
            p.user_id == user_id && p.kind == PaymentType::Withdraw && !p.status.is_terminal()
        });
        if has_pending {
            return Err(CoreError::Conflict("pending withdraw exists".into()));
        }

        let balance = state.balances.entry(user_id).or_insert(Money::ZERO);
        let new_balance = balance
            .checked_sub(amount)
            .filter(|b| !b.is_negative())
            .ok_or(CoreError::InsufficientFunds)?;
        *balance = new_balance;

        let now = Utc::now();
        let intent = PaymentIntent {
            id: Uuid::new_v4(),
            user_id,
            kind: PaymentType::Withdraw,
            amount,
            external_id,
            gateway_txn_id: None,
            status: PaymentStatus::Processing,
            gateway_status: None,
            error_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.payments.insert(intent.id, intent.clone());
        Ok(intent)
    }

    async fn set_gateway_txn_id(&self, intent_id: Uuid, gateway_txn_id: String) -> CoreResult<()> {
        let mut state = self.state.lock();
        let intent = state
            .payments
            .get_mut(&intent_id)
            .ok_or_else(|| CoreError::NotFound("payment intent".into()))?;
        intent.gateway_txn_id = Some(gateway_txn_id);
        intent.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_intent_synchronously(
        &self,
        intent_id: Uuid,
        error_reason: String,
    ) -> CoreResult<PaymentIntent> {
        let mut state = self.state.lock();
        let status = state
            .payments
            .get(&intent_id)
            .map(|p| p.status)
            .ok_or_else(|| CoreError::NotFound("payment intent".into()))?;
        if status.is_terminal() {
            return Ok(state.payments[&intent_id].clone());
        }

        let (user_id, kind, amount) = {
            let p = &state.payments[&intent_id];
            (p.user_id, p.kind, p.amount)
        };
        if kind == PaymentType::Withdraw {
            let balance = state.balances.entry(user_id).or_insert(Money::ZERO);
            *balance = balance.checked_add(amount).unwrap_or(*balance);
        }

        let intent = state.payments.get_mut(&intent_id).unwrap();
        intent.status = PaymentStatus::Failed;
        intent.error_reason = Some(error_reason);
        intent.updated_at = Utc::now();
        Ok(intent.clone())
    }

    async fn get_payment_intent(&self, intent_id: Uuid) -> CoreResult<Option<PaymentIntent>> {
        Ok(self.state.lock().payments.get(&intent_id).cloned())
    }

    async fn claim_pollable_intents(
        &self,
        kind: PaymentType,
        limit: i64,
    ) -> CoreResult<Vec<PaymentIntent>> {
        let state = self.state.lock();
        let mut intents: Vec<PaymentIntent> = state
            .payments
            .values()
            .filter(|p| p.kind == kind && !p.status.is_terminal())
            .cloned()
            .collect();
        intents.sort_by_key(|p| p.created_at);
        intents.truncate(limit.max(0) as usize);
        Ok(intents)
    }

    async fn transition_intent_terminal(
        &self,
        intent_id: Uuid,
        new_status: PaymentStatus,
        gateway_status: Option<String>,
        error_reason: Option<String>,
    ) -> CoreResult<PaymentIntent> {
        let mut state = self.state.lock();
        let status = state
            .payments
            .get(&intent_id)
            .map(|p| p.status)
            .ok_or_else(|| CoreError::NotFound("payment intent".into()))?;
        if status.is_terminal() {
            return Ok(state.payments[&intent_id].clone());
        }

        let (user_id, kind, amount) = {
            let p = &state.payments[&intent_id];
            (p.user_id, p.kind, p.amount)
        };
        let should_credit = matches!(
            (kind, new_status),
            (PaymentType::Deposit, PaymentStatus::Confirmed)
                | (PaymentType::Withdraw, PaymentStatus::Failed | PaymentStatus::Expired)
        );
        if should_credit {
            let balance = state.balances.entry(user_id).or_insert(Money::ZERO);
            *balance = balance.checked_add(amount).unwrap_or(*balance);
        }

        let intent = state.payments.get_mut(&intent_id).unwrap();
        intent.status = new_status;
        intent.gateway_status = gateway_status;
        intent.error_reason = error_reason;
        intent.updated_at = Utc::now();
        Ok(intent.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_round(ledger: &InMemoryLedger, crash_point: rust_decimal::Decimal) -> Uuid {
        let round_id = Uuid::new_v4();
        futures::executor::block_on(ledger.persist_round_start(RoundMeta {
            round_id,
            commit_idx: Some(0),
            server_seed_hash: vec![0u8; 32],
            crash_point,
            started_at: Utc::now(),
            settlement_window_seconds: 300,
        }))
        .unwrap();
        round_id
    }

    #[tokio::test]
    async fn place_bet_rejects_duplicate_active_bet() {
        let ledger = InMemoryLedger::new(300);
        let user = Uuid::new_v4();
        ledger.seed_balance(user, Money::from_i64_cents(10_000));
        let round_id = make_round(&ledger, dec!(3.50));

        ledger
            .place_bet(user, round_id, Money::from_i64_cents(1000))
            .await
            .unwrap();
        let second = ledger.place_bet(user, round_id, Money::from_i64_cents(1000)).await;
        assert!(matches!(second, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn settle_cashout_is_idempotent() {
        let ledger = InMemoryLedger::new(300);
        let user = Uuid::new_v4();
        ledger.seed_balance(user, Money::from_i64_cents(10_000));
        let round_id = make_round(&ledger, dec!(3.50));
        ledger
            .place_bet(user, round_id, Money::from_i64_cents(1000))
            .await
            .unwrap();

        let outcome = CashoutOutcome {
            round_id,
            win: true,
            multiplier: dec!(3.20),
            payout: Money::from_i64_cents(3200),
        };
        let first = ledger.settle_cashout(user, round_id, outcome).await.unwrap();
        assert!(!first.idempotent);
        assert_eq!(first.payout, Money::from_i64_cents(3200));

        let second = ledger.settle_cashout(user, round_id, outcome).await.unwrap();
        assert!(second.idempotent);
        assert_eq!(second.payout, first.payout);
        assert_eq!(second.new_balance, first.new_balance);
    }
}
