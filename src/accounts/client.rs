use bigdecimal::BigDecimal;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("account request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    InsufficientFunds(String),

    #[error("account not found: {0}")]
    NotFound(String),

    #[error("account service returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("account service circuit breaker is open")]
    CircuitOpen,
}

/// Bearer credential of the original caller, threaded explicitly to every
/// account-service call instead of being re-read from ambient request state.
#[derive(Debug, Clone)]
pub struct ForwardedCredential(String);

impl ForwardedCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

/// Account state as the account service reports it after a mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: Uuid,
    pub balance: BigDecimal,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct MutationResponse {
    #[allow(dead_code)]
    message: Option<String>,
    account: AccountView,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// HTTP client for the account service's mutation endpoints.
#[derive(Clone)]
pub struct AccountClient {
    client: Client,
    base_url: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl AccountClient {
    pub fn new(base_url: String) -> Self {
        Self::with_circuit_breaker(base_url, 3, 60)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        AccountClient {
            client,
            base_url,
            circuit_breaker,
        }
    }

    /// Credits `amount` to the account, forwarding the caller's credential.
    pub async fn deposit(
        &self,
        account_id: Uuid,
        amount: &BigDecimal,
        credential: &ForwardedCredential,
    ) -> Result<AccountView, AccountError> {
        self.mutate("deposit", account_id, amount, credential).await
    }

    /// Debits `amount` from the account; the account service owns the funds
    /// check on this path and its refusal is surfaced verbatim.
    pub async fn withdraw(
        &self,
        account_id: Uuid,
        amount: &BigDecimal,
        credential: &ForwardedCredential,
    ) -> Result<AccountView, AccountError> {
        self.mutate("withdraw", account_id, amount, credential).await
    }

    async fn mutate(
        &self,
        operation: &str,
        account_id: Uuid,
        amount: &BigDecimal,
        credential: &ForwardedCredential,
    ) -> Result<AccountView, AccountError> {
        let url = format!(
            "{}/api/accounts/{}/{}",
            self.base_url.trim_end_matches('/'),
            account_id,
            operation
        );
        let client = self.client.clone();
        let authorization = credential.bearer();
        let body = serde_json::json!({ "amount": amount });

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .post(&url)
                    .header("Authorization", authorization)
                    .json(&body)
                    .send()
                    .await?;

                let status = response.status();
                if status.is_success() {
                    let parsed = response.json::<MutationResponse>().await?;
                    return Ok(parsed.account);
                }

                let message = response
                    .json::<ErrorBody>()
                    .await
                    .ok()
                    .and_then(|b| b.message.or(b.error))
                    .unwrap_or_else(|| format!("{operation} failed"));

                if status.as_u16() == 400 && message.to_lowercase().contains("insufficient") {
                    return Err(AccountError::InsufficientFunds(message));
                }
                if status.as_u16() == 404 {
                    return Err(AccountError::NotFound(message));
                }
                Err(AccountError::Upstream {
                    status: status.as_u16(),
                    message,
                })
            })
            .await;

        match result {
            Ok(account) => Ok(account),
            Err(FailsafeError::Rejected) => Err(AccountError::CircuitOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}
