//! Row types for SQLx. Ledger rows are flat; the domain layer owns the
//! typed representation and conversions happen at this boundary.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionKind, TransactionStatus};

/// Flat `transactions` row. Which account columns are populated depends on
/// the `type` tag; `into_domain` enforces that.
#[derive(Debug, FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub from_account_id: Option<Uuid>,
    pub to_account_id: Option<Uuid>,
    pub amount: BigDecimal,
    #[sqlx(rename = "type")]
    pub type_tag: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRow {
    pub fn into_domain(self) -> Result<Transaction, String> {
        let kind =
            TransactionKind::from_parts(&self.type_tag, self.from_account_id, self.to_account_id)?;
        let status = TransactionStatus::parse(&self.status)?;

        Ok(Transaction {
            id: self.id,
            kind,
            amount: self.amount,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Dead-letter entry for a transfer job whose retries were exhausted by an
/// infrastructure failure. `payload` holds the original job JSON so a
/// requeue can re-enqueue it verbatim.
#[derive(Debug, FromRow, Serialize)]
pub struct TransactionDlq {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub error_reason: String,
    pub retry_count: i32,
    pub payload: serde_json::Value,
    pub original_created_at: DateTime<Utc>,
    pub moved_to_dlq_at: DateTime<Utc>,
}
