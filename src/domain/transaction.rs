//! Transaction domain entity.
//! Framework-agnostic representation of a ledger entry.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle of a ledger entry.
///
/// `Pending` is the only non-terminal state. Transfers start `Pending` and are
/// settled by the worker to `Completed` or `Failed`. Deposits and withdrawals
/// are written `Success` after the account service already applied them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Success,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "PENDING" => Ok(TransactionStatus::Pending),
            "SUCCESS" => Ok(TransactionStatus::Success),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// The shape of a ledger entry, keyed by its `type` tag.
///
/// Deposits and withdrawals carry a single account; only transfers relate two.
/// The tag is authoritative when decoding rows, never the presence of the
/// account columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Transfer {
        from_account_id: Uuid,
        to_account_id: Uuid,
    },
    Deposit {
        account_id: Uuid,
    },
    Withdrawal {
        account_id: Uuid,
    },
}

impl TransactionKind {
    pub fn type_tag(&self) -> &'static str {
        match self {
            TransactionKind::Transfer { .. } => "TRANSFER",
            TransactionKind::Deposit { .. } => "DEPOSIT",
            TransactionKind::Withdrawal { .. } => "WITHDRAWAL",
        }
    }

    /// Rebuilds the kind from a stored `type` tag and the nullable account
    /// columns. Deposits store their account in `to_account_id` (money in),
    /// withdrawals in `from_account_id` (money out).
    pub fn from_parts(
        type_tag: &str,
        from_account_id: Option<Uuid>,
        to_account_id: Option<Uuid>,
    ) -> Result<Self, String> {
        match type_tag {
            "TRANSFER" => match (from_account_id, to_account_id) {
                (Some(from), Some(to)) => Ok(TransactionKind::Transfer {
                    from_account_id: from,
                    to_account_id: to,
                }),
                _ => Err("TRANSFER row is missing an account id".to_string()),
            },
            "DEPOSIT" => to_account_id
                .map(|account_id| TransactionKind::Deposit { account_id })
                .ok_or_else(|| "DEPOSIT row is missing to_account_id".to_string()),
            "WITHDRAWAL" => from_account_id
                .map(|account_id| TransactionKind::Withdrawal { account_id })
                .ok_or_else(|| "WITHDRAWAL row is missing from_account_id".to_string()),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }

    /// Value of the `from_account_id` column for this kind.
    pub fn from_account_id(&self) -> Option<Uuid> {
        match self {
            TransactionKind::Transfer {
                from_account_id, ..
            } => Some(*from_account_id),
            TransactionKind::Withdrawal { account_id } => Some(*account_id),
            TransactionKind::Deposit { .. } => None,
        }
    }

    /// Value of the `to_account_id` column for this kind.
    pub fn to_account_id(&self) -> Option<Uuid> {
        match self {
            TransactionKind::Transfer { to_account_id, .. } => Some(*to_account_id),
            TransactionKind::Deposit { account_id } => Some(*account_id),
            TransactionKind::Withdrawal { .. } => None,
        }
    }
}

/// Domain entity representing one ledger entry.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub amount: BigDecimal,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    fn new(kind: TransactionKind, amount: BigDecimal, status: TransactionStatus) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            amount,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// A transfer awaiting settlement by the worker.
    pub fn pending_transfer(
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: BigDecimal,
    ) -> Self {
        Self::new(
            TransactionKind::Transfer {
                from_account_id,
                to_account_id,
            },
            amount,
            TransactionStatus::Pending,
        )
    }

    /// A deposit the account service has already applied.
    pub fn settled_deposit(account_id: Uuid, amount: BigDecimal) -> Self {
        Self::new(
            TransactionKind::Deposit { account_id },
            amount,
            TransactionStatus::Success,
        )
    }

    /// A withdrawal the account service has already applied.
    pub fn settled_withdrawal(account_id: Uuid, amount: BigDecimal) -> Self {
        Self::new(
            TransactionKind::Withdrawal { account_id },
            amount,
            TransactionStatus::Success,
        )
    }
}
