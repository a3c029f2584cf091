//! C6 — Payment reconciler.
//!
//! A supervisor bounding concurrent polling jobs with a
//! `tokio::sync::Semaphore` (the "background polling coroutines -> worker
//! pool / supervised tasks" redesign flag), delegating the per-intent loop
//! to `job::poll_intent`. Grounded on
//! `reecen9696-atomiq-bet-settlement`'s claim-then-process batch shape,
//! here claiming rows from the ledger's row-locked SQL transactions instead
//! of a Redis pipeline.

pub mod gateway;
pub mod job;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use uuid::Uuid;

use self::gateway::{GatewayRequestParams, PaymentGateway};
use crate::domain::{PaymentIntent, PaymentType};
use crate::error::{CoreError, CoreResult};
use crate::ledger::Ledger;
use crate::money::Money;

pub struct ReconcilerConfig {
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
}

pub struct PaymentReconciler {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn PaymentGateway>,
    semaphore: Arc<Semaphore>,
    config: ReconcilerConfig,
}

impl PaymentReconciler {
    pub fn new(ledger: Arc<dyn Ledger>, gateway: Arc<dyn PaymentGateway>, config: ReconcilerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Self {
            ledger,
            gateway,
            semaphore,
            config,
        }
    }

    /// Synchronous part of deposit creation (spec §6: `POST
    /// /payments/deposit`): opens a `pending` intent, then spawns its
    /// background poll. The gateway call itself is made by the poller once
    /// a `gateway_txn_id` is available through `begin_deposit`/
    /// `begin_withdraw`, mirroring the fact that this core crate has no
    /// HTTP layer to synchronously block a caller on.
    pub async fn begin_deposit(
        &self,
        user_id: Uuid,
        amount: Money,
        external_id: Uuid,
        sender_phone: String,
    ) -> CoreResult<PaymentIntent> {
        let intent = self
            .ledger
            .create_deposit_intent(user_id, amount, external_id)
            .await?;

        match self
            .gateway
            .create_deposit(GatewayRequestParams {
                amount,
                sender: sender_phone,
                receiver: "platform".into(),
                uuid: external_id,
                token: String::new(),
                description: "deposit".into(),
            })
            .await
        {
            Ok(response) => {
                self.ledger
                    .set_gateway_txn_id(intent.id, response.gateway_txn_id)
                    .await?;
            }
            Err(e) => {
                tracing::warn!(intent_id = %intent.id, error = %e, "deposit gateway call failed synchronously");
                return self
                    .ledger
                    .fail_intent_synchronously(intent.id, e.to_string())
                    .await;
            }
        }

        let refreshed = self
            .ledger
            .get_payment_intent(intent.id)
            .await?
            .ok_or_else(|| CoreError::NotFound("payment intent".into()))?;
        self.spawn_job(refreshed.clone());
        Ok(refreshed)
    }

    /// Synchronous part of withdrawal creation (spec §6, §4.6): debits the
    /// user and opens a `processing` intent atomically, calls the gateway,
    /// and reverses the debit in the same transaction on a synchronous
    /// rejection.
    pub async fn begin_withdraw(
        &self,
        user_id: Uuid,
        amount: Money,
        external_id: Uuid,
        receiver_phone: String,
    ) -> CoreResult<PaymentIntent> {
        let intent = self
            .ledger
            .create_withdraw_intent(user_id, amount, external_id)
            .await?;

        match self
            .gateway
            .create_withdrawal(GatewayRequestParams {
                amount,
                sender: "platform".into(),
                receiver: receiver_phone,
                uuid: external_id,
                token: String::new(),
                description: "withdraw".into(),
            })
            .await
        {
            Ok(response) => {
                self.ledger
                    .set_gateway_txn_id(intent.id, response.gateway_txn_id)
                    .await?;
            }
            Err(e) => {
                tracing::warn!(intent_id = %intent.id, error = %e, "withdraw gateway call failed synchronously");
                return self
                    .ledger
                    .fail_intent_synchronously(intent.id, e.to_string())
                    .await;
            }
        }

        let refreshed = self
            .ledger
            .get_payment_intent(intent.id)
            .await?
            .ok_or_else(|| CoreError::NotFound("payment intent".into()))?;
        self.spawn_job(refreshed.clone());
        Ok(refreshed)
    }

    /// Called at boot to resume polling for any intent left non-terminal
    /// by a previous process (spec §5's graceful-shutdown "wait for
    /// in-flight intents... or hit a bounded deadline" implies a restart
    /// must pick these back up).
    pub async fn resume_pending(&self) -> CoreResult<usize> {
        let mut resumed = 0;
        for kind in [PaymentType::Deposit, PaymentType::Withdraw] {
            let intents = self.ledger.claim_pollable_intents(kind, 1000).await?;
            for intent in intents {
                if intent.gateway_txn_id.is_some() {
                    self.spawn_job(intent);
                    resumed += 1;
                }
            }
        }
        Ok(resumed)
    }

    fn spawn_job(&self, intent: PaymentIntent) {
        let ledger = self.ledger.clone();
        let gateway = self.gateway.clone();
        let semaphore = self.semaphore.clone();
        let max_attempts = self.config.poll_attempts;
        let interval = self.config.poll_interval;

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            if let Err(e) = job::poll_intent(ledger, gateway, intent.clone(), max_attempts, interval).await {
                tracing::error!(intent_id = %intent.id, error = %e, "polling job failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedger;
    use crate::reconciler::gateway::mock::MockPaymentGateway;
    use crate::reconciler::gateway::GatewayOutcome;

    #[tokio::test]
    async fn begin_deposit_spawns_a_pollable_intent() {
        let ledger: Arc<dyn Ledger> = Arc::new(InMemoryLedger::new(300));
        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(MockPaymentGateway::new(vec![GatewayOutcome::Successful]));
        let reconciler = PaymentReconciler::new(
            ledger.clone(),
            gateway,
            ReconcilerConfig {
                poll_attempts: 3,
                poll_interval: Duration::from_millis(1),
                max_concurrent_jobs: 4,
            },
        );

        let user = Uuid::new_v4();
        let intent = reconciler
            .begin_deposit(user, Money::from_i64_cents(1500), Uuid::new_v4(), "0700000000".into())
            .await
            .unwrap();

        assert!(intent.gateway_txn_id.is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let balance = ledger.get_user_balance(user).await.unwrap();
        assert_eq!(balance, Money::from_i64_cents(1500));
    }
}
