//! C6's polling loop, one task per in-flight `PaymentIntent` (spec.md §4.6).

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::gateway::{GatewayOutcome, PaymentGateway};
use crate::domain::{PaymentIntent, PaymentStatus, PaymentType};
use crate::error::CoreResult;
use crate::ledger::Ledger;

/// Polls one intent's gateway status up to `max_attempts` times at
/// `interval`, taking the terminal transition the first time the gateway
/// answers definitively, or expiring (with a withdrawal refund) if it
/// never does.
pub async fn poll_intent(
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn PaymentGateway>,
    intent: PaymentIntent,
    max_attempts: u32,
    interval: Duration,
) -> CoreResult<()> {
    let gateway_txn_id = match &intent.gateway_txn_id {
        Some(id) => id.clone(),
        None => {
            tracing::warn!(intent_id = %intent.id, "polling skipped: no gateway_txn_id recorded");
            return Ok(());
        }
    };

    for attempt in 1..=max_attempts {
        tokio::time::sleep(interval).await;

        let current = ledger.get_payment_intent(intent.id).await?;
        let current = match current {
            Some(i) if !i.status.is_terminal() => i,
            Some(i) => {
                tracing::info!(intent_id = %i.id, status = ?i.status, "already terminal, stopping poll");
                return Ok(());
            }
            None => return Ok(()),
        };

        let outcome = match gateway.poll_status(current.kind, &gateway_txn_id).await {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(intent_id = %current.id, attempt, error = %e, "gateway poll failed, retrying");
                continue;
            }
        };

        match outcome {
            GatewayOutcome::Successful => {
                transition(&ledger, current.id, PaymentStatus::Confirmed, &outcome, None).await?;
                return Ok(());
            }
            GatewayOutcome::Failed => {
                transition(&ledger, current.id, PaymentStatus::Failed, &outcome, None).await?;
                return Ok(());
            }
            GatewayOutcome::Pending => {
                if attempt == max_attempts {
                    tracing::warn!(intent_id = %current.id, "exhausted poll attempts, expiring");
                    transition(
                        &ledger,
                        current.id,
                        PaymentStatus::Expired,
                        &outcome,
                        Some("poll attempts exhausted".into()),
                    )
                    .await?;
                }
            }
        }
    }

    Ok(())
}

async fn transition(
    ledger: &Arc<dyn Ledger>,
    intent_id: Uuid,
    new_status: PaymentStatus,
    outcome: &GatewayOutcome,
    error_reason: Option<String>,
) -> CoreResult<()> {
    let gateway_status = Some(format!("{outcome:?}"));
    let updated = ledger
        .transition_intent_terminal(intent_id, new_status, gateway_status, error_reason)
        .await?;
    tracing::info!(
        intent_id = %updated.id,
        kind = ?updated.kind,
        status = ?updated.status,
        "payment intent reached terminal state"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedger;
    use crate::money::Money;
    use crate::reconciler::gateway::mock::MockPaymentGateway;
    use std::sync::Arc;

    #[tokio::test]
    async fn successful_poll_confirms_deposit_and_credits_balance() {
        let ledger: Arc<dyn Ledger> = Arc::new(InMemoryLedger::new(300));
        let user = Uuid::new_v4();
        let intent = ledger
            .create_deposit_intent(user, Money::from_i64_cents(5000), Uuid::new_v4())
            .await
            .unwrap();
        ledger
            .set_gateway_txn_id(intent.id, "gw-1".into())
            .await
            .unwrap();
        let intent = ledger.get_payment_intent(intent.id).await.unwrap().unwrap();

        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(MockPaymentGateway::new(vec![GatewayOutcome::Successful]));

        poll_intent(ledger.clone(), gateway, intent, 3, Duration::from_millis(1))
            .await
            .unwrap();

        let balance = ledger.get_user_balance(user).await.unwrap();
        assert_eq!(balance, Money::from_i64_cents(5000));
    }

    #[tokio::test]
    async fn exhausted_attempts_expires_and_refunds_withdrawal() {
        let ledger: Arc<dyn Ledger> = Arc::new(InMemoryLedger::new(300));
        let user = Uuid::new_v4();
        ledger
            .credit_user(user, Money::from_i64_cents(10_000))
            .await
            .unwrap();

        let intent = ledger
            .create_withdraw_intent(user, Money::from_i64_cents(2000), Uuid::new_v4())
            .await
            .unwrap();
        ledger
            .set_gateway_txn_id(intent.id, "gw-2".into())
            .await
            .unwrap();
        let intent = ledger.get_payment_intent(intent.id).await.unwrap().unwrap();
        let balance_before = ledger.get_user_balance(user).await.unwrap();

        let gateway: Arc<dyn PaymentGateway> = Arc::new(MockPaymentGateway::new(vec![
            GatewayOutcome::Pending,
            GatewayOutcome::Pending,
        ]));

        poll_intent(ledger.clone(), gateway, intent, 2, Duration::from_millis(1))
            .await
            .unwrap();

        let balance_after = ledger.get_user_balance(user).await.unwrap();
        assert_eq!(
            balance_after,
            balance_before.checked_add(Money::from_i64_cents(2000)).unwrap()
        );
    }
}
