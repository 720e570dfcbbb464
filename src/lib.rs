pub mod accounts;
pub mod cache;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod queue;
pub mod services;
pub mod startup;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::accounts::AccountClient;
use crate::cache::BalanceCache;
use crate::queue::TransferQueue;

/// Process-wide handles: opened once at startup, injected everywhere.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub queue: TransferQueue,
    pub cache: BalanceCache,
    pub accounts: AccountClient,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/transfer", post(handlers::transfer::initiate_transfer))
        .route("/deposit", post(handlers::transfer::deposit))
        .route("/withdraw", post(handlers::transfer::withdraw))
        .route("/transactions/:id", get(handlers::transfer::get_transaction))
        .merge(handlers::dlq::dlq_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
