//! External payment gateway client (spec.md §6).
//!
//! Two base URLs (collections for deposit, disbursements for withdrawal),
//! JSON POST bodies, and a case-insensitive status-string mapping into
//! three outcomes. Grounded on `openibank-openibank`'s `reqwest` + `tokio`
//! stack for outbound HTTP from a money-moving service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::PaymentType;
use crate::error::{CoreError, CoreResult};
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Successful,
    Failed,
    Pending,
}

/// Case-insensitive mapping from spec.md §6.
pub fn map_gateway_status(status: &str) -> GatewayOutcome {
    match status.to_ascii_uppercase().as_str() {
        "SUCCESSFUL" | "SUCCESS" | "CONFIRMED" | "COMPLETED" | "OK" => GatewayOutcome::Successful,
        "FAILED" | "FAILURE" | "ERROR" | "REJECTED" | "DECLINED" => GatewayOutcome::Failed,
        _ => GatewayOutcome::Pending,
    }
}

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    amount: String,
    sender: &'a str,
    receiver: &'a str,
    uuid: Uuid,
    token: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct GatewayResponse {
    pub gateway_txn_id: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct GatewayRequestParams {
    pub amount: Money,
    pub sender: String,
    pub receiver: String,
    pub uuid: Uuid,
    pub token: String,
    pub description: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_deposit(&self, params: GatewayRequestParams) -> CoreResult<GatewayResponse>;
    async fn create_withdrawal(&self, params: GatewayRequestParams) -> CoreResult<GatewayResponse>;
    async fn poll_status(&self, kind: PaymentType, gateway_txn_id: &str) -> CoreResult<GatewayOutcome>;
}

pub struct HttpPaymentGateway {
    client: reqwest::Client,
    deposit_base_url: String,
    withdraw_base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(client: reqwest::Client, deposit_base_url: String, withdraw_base_url: String) -> Self {
        Self {
            client,
            deposit_base_url,
            withdraw_base_url,
        }
    }

    async fn post(&self, base_url: &str, params: &GatewayRequestParams) -> CoreResult<GatewayResponse> {
        let body = GatewayRequest {
            amount: params.amount.to_string(),
            sender: &params.sender,
            receiver: &params.receiver,
            uuid: params.uuid,
            token: &params.token,
            description: &params.description,
        };

        let response = self
            .client
            .post(base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Downstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::Downstream(format!(
                "gateway returned status {}",
                response.status()
            )));
        }

        response
            .json::<GatewayResponse>()
            .await
            .map_err(|e| CoreError::Downstream(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_deposit(&self, params: GatewayRequestParams) -> CoreResult<GatewayResponse> {
        self.post(&self.deposit_base_url, &params).await
    }

    async fn create_withdrawal(&self, params: GatewayRequestParams) -> CoreResult<GatewayResponse> {
        self.post(&self.withdraw_base_url, &params).await
    }

    async fn poll_status(&self, kind: PaymentType, gateway_txn_id: &str) -> CoreResult<GatewayOutcome> {
        let base_url = match kind {
            PaymentType::Deposit => &self.deposit_base_url,
            PaymentType::Withdraw => &self.withdraw_base_url,
        };
        let url = format!("{base_url}/{gateway_txn_id}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::Downstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::Downstream(format!(
                "gateway status poll returned {}",
                response.status()
            )));
        }

        let parsed: GatewayResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Downstream(e.to_string()))?;
        Ok(map_gateway_status(&parsed.status))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Test double that replays a scripted sequence of outcomes, the same
    /// "claim then answer deterministically" shape the polling loop's own
    /// unit tests need (mirrors the pack's hand-rolled fakes rather than a
    /// mocking-framework dependency).
    pub struct MockPaymentGateway {
        pub scripted_outcomes: Mutex<VecDeque<GatewayOutcome>>,
    }

    impl MockPaymentGateway {
        pub fn new(outcomes: Vec<GatewayOutcome>) -> Self {
            Self {
                scripted_outcomes: Mutex::new(outcomes.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for MockPaymentGateway {
        async fn create_deposit(&self, params: GatewayRequestParams) -> CoreResult<GatewayResponse> {
            Ok(GatewayResponse {
                gateway_txn_id: params.uuid.to_string(),
                status: "PENDING".into(),
            })
        }

        async fn create_withdrawal(&self, params: GatewayRequestParams) -> CoreResult<GatewayResponse> {
            Ok(GatewayResponse {
                gateway_txn_id: params.uuid.to_string(),
                status: "PENDING".into(),
            })
        }

        async fn poll_status(&self, _kind: PaymentType, _gateway_txn_id: &str) -> CoreResult<GatewayOutcome> {
            Ok(self
                .scripted_outcomes
                .lock()
                .pop_front()
                .unwrap_or(GatewayOutcome::Pending))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_case_insensitive() {
        assert_eq!(map_gateway_status("successful"), GatewayOutcome::Successful);
        assert_eq!(map_gateway_status("Confirmed"), GatewayOutcome::Successful);
        assert_eq!(map_gateway_status("FAILED"), GatewayOutcome::Failed);
        assert_eq!(map_gateway_status("declined"), GatewayOutcome::Failed);
        assert_eq!(map_gateway_status("whatever-else"), GatewayOutcome::Pending);
    }
}
