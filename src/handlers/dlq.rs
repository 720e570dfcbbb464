use axum::{
    Router,
    extract::{Path, State},
    response::Json,
    routing::{get, post},
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::AppState;
use crate::db::queries;
use crate::error::AppError;
use crate::queue::TransferJob;

pub fn dlq_routes() -> Router<AppState> {
    Router::new()
        .route("/dlq", get(list_dlq))
        .route("/dlq/:id/requeue", post(requeue_dlq))
}

async fn list_dlq(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let entries = queries::list_dlq(&state.db).await?;

    Ok(Json(json!({
        "dlq_entries": entries,
        "count": entries.len(),
    })))
}

/// Puts a dead-lettered transfer back on the queue: the DLQ row is removed,
/// the transaction reset to PENDING, and the original job re-enqueued.
async fn requeue_dlq(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let mut db_tx = state.db.begin().await?;

    let entry = queries::take_dlq_entry(&mut db_tx, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("DLQ entry {id} not found")))?;

    let job: TransferJob = serde_json::from_value(entry.payload.clone())
        .map_err(|e| AppError::Internal(format!("corrupt DLQ payload: {e}")))?;

    queries::reset_transaction_to_pending(&mut db_tx, entry.transaction_id).await?;
    db_tx.commit().await?;

    state.queue.enqueue(&job).await?;

    tracing::info!(dlq_id = %id, transaction_id = %entry.transaction_id, "DLQ entry requeued");

    Ok(Json(json!({
        "message": "DLQ entry requeued",
        "dlq_id": id,
        "transactionId": entry.transaction_id,
    })))
}
