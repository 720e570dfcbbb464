use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::accounts::ForwardedCredential;
use crate::db::queries;
use crate::domain::{Transaction, TransactionStatus};
use crate::error::AppError;
use crate::queue::TransferJob;

/// Wire shape of a ledger entry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionBody {
    pub id: Uuid,
    pub from_account_id: Option<Uuid>,
    pub to_account_id: Option<Uuid>,
    pub amount: BigDecimal,
    #[serde(rename = "type")]
    pub type_tag: &'static str,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionBody {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id,
            from_account_id: tx.kind.from_account_id(),
            to_account_id: tx.kind.to_account_id(),
            amount: tx.amount.clone(),
            type_tag: tx.kind.type_tag(),
            status: tx.status.as_str(),
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

// Fields are optional so missing ones surface as a 400 validation error
// rather than a body-rejection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from_account_id: Option<Uuid>,
    pub to_account_id: Option<Uuid>,
    pub amount: Option<BigDecimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOperationRequest {
    pub account_id: Option<Uuid>,
    pub amount: Option<BigDecimal>,
}

fn require_positive(amount: Option<BigDecimal>) -> Result<BigDecimal, AppError> {
    let amount =
        amount.ok_or_else(|| AppError::Validation("amount is required".to_string()))?;
    if amount <= BigDecimal::from(0) {
        return Err(AppError::Validation("amount must be positive".to_string()));
    }
    Ok(amount)
}

fn forwarded_credential(headers: &HeaderMap) -> Result<ForwardedCredential, AppError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    // The gateway forwards the caller's token as `x-auth` as well; accept
    // either form.
    let token = bearer.or_else(|| {
        headers
            .get("x-auth")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    token
        .filter(|t| !t.is_empty())
        .map(ForwardedCredential::new)
        .ok_or_else(|| AppError::Unauthorized("missing bearer credential".to_string()))
}

/// `POST /transfer` — writes the PENDING ledger row, enqueues the job and
/// returns immediately. The funds check belongs to the worker; the caller
/// polls `GET /transactions/:id` for the settlement outcome.
pub async fn initiate_transfer(
    State(state): State<AppState>,
    Json(req): Json<TransferRequest>,
) -> Result<impl IntoResponse, AppError> {
    let from = req
        .from_account_id
        .ok_or_else(|| AppError::Validation("fromAccountId is required".to_string()))?;
    let to = req
        .to_account_id
        .ok_or_else(|| AppError::Validation("toAccountId is required".to_string()))?;
    let amount = require_positive(req.amount)?;
    if from == to {
        return Err(AppError::Validation(
            "fromAccountId and toAccountId must differ".to_string(),
        ));
    }

    let tx = Transaction::pending_transfer(from, to, amount.clone());
    queries::insert_transaction(&state.db, &tx).await?;

    let job = TransferJob {
        transaction_id: tx.id,
        from_account_id: from,
        to_account_id: to,
        amount,
    };
    if let Err(e) = state.queue.enqueue(&job).await {
        // The PENDING row exists but no job carries it; mark it terminal
        // instead of leaving it stuck.
        if let Err(db_err) =
            queries::settle_transaction(&state.db, tx.id, TransactionStatus::Failed).await
        {
            tracing::error!(transaction_id = %tx.id, error = %db_err, "failed to mark unqueued transfer FAILED");
        }
        return Err(e.into());
    }

    tracing::info!(transaction_id = %tx.id, "transfer initiated");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Transfer initiated",
            "transactionId": tx.id,
        })),
    ))
}

/// `POST /deposit` — synchronous path. The ledger row is written only after
/// the account service confirmed the mutation.
pub async fn deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AccountOperationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account_id = req
        .account_id
        .ok_or_else(|| AppError::Validation("accountId is required".to_string()))?;
    let amount = require_positive(req.amount)?;
    let credential = forwarded_credential(&headers)?;

    state
        .accounts
        .deposit(account_id, &amount, &credential)
        .await?;

    let tx = Transaction::settled_deposit(account_id, amount);
    queries::insert_transaction(&state.db, &tx).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Deposit successful",
            "transaction": TransactionBody::from(&tx),
        })),
    ))
}

/// `POST /withdraw` — synchronous path; the account service owns the funds
/// check here and its refusal is surfaced without writing a ledger row.
pub async fn withdraw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AccountOperationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account_id = req
        .account_id
        .ok_or_else(|| AppError::Validation("accountId is required".to_string()))?;
    let amount = require_positive(req.amount)?;
    let credential = forwarded_credential(&headers)?;

    state
        .accounts
        .withdraw(account_id, &amount, &credential)
        .await?;

    let tx = Transaction::settled_withdrawal(account_id, amount);
    queries::insert_transaction(&state.db, &tx).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Withdrawal successful",
            "transaction": TransactionBody::from(&tx),
        })),
    ))
}

/// `GET /transactions/:id` — settlement polling surface.
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = queries::get_transaction(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Transaction {id} not found")))?;

    Ok(Json(TransactionBody::from(&tx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transaction_body_wire_shape() {
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let tx =
            Transaction::pending_transfer(from, to, BigDecimal::from_str("100.50").unwrap());
        let value = serde_json::to_value(TransactionBody::from(&tx)).unwrap();

        assert_eq!(value["type"], "TRANSFER");
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["fromAccountId"], from.to_string());
        assert_eq!(value["toAccountId"], to.to_string());
    }

    #[test]
    fn test_deposit_body_has_null_from_account() {
        let account = Uuid::new_v4();
        let tx = Transaction::settled_deposit(account, BigDecimal::from(10));
        let value = serde_json::to_value(TransactionBody::from(&tx)).unwrap();

        assert_eq!(value["type"], "DEPOSIT");
        assert_eq!(value["status"], "SUCCESS");
        assert!(value["fromAccountId"].is_null());
        assert_eq!(value["toAccountId"], account.to_string());
    }

    #[test]
    fn test_require_positive() {
        assert!(require_positive(None).is_err());
        assert!(require_positive(Some(BigDecimal::from(0))).is_err());
        assert!(require_positive(Some(BigDecimal::from(-5))).is_err());
        assert!(require_positive(Some(BigDecimal::from(5))).is_ok());
    }

    #[test]
    fn test_forwarded_credential_from_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer tok-123".parse().unwrap());

        let credential = forwarded_credential(&headers).unwrap();
        assert_eq!(credential.bearer(), "Bearer tok-123");
    }

    #[test]
    fn test_forwarded_credential_from_x_auth_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-auth", "tok-456".parse().unwrap());

        let credential = forwarded_credential(&headers).unwrap();
        assert_eq!(credential.bearer(), "Bearer tok-456");
    }

    #[test]
    fn test_missing_credential_is_unauthorized() {
        let headers = HeaderMap::new();
        assert!(matches!(
            forwarded_credential(&headers),
            Err(AppError::Unauthorized(_))
        ));
    }
}
