use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledger_core::accounts::AccountClient;
use ledger_core::cache::BalanceCache;
use ledger_core::config::Config;
use ledger_core::queue::TransferQueue;
use ledger_core::services::TransferWorker;
use ledger_core::{AppState, create_app, db, startup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = db::create_pool(&config).await?;

    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let queue = TransferQueue::new(&config.redis_url)?;
    let cache = BalanceCache::new(&config.redis_url)?;
    let accounts = AccountClient::new(config.account_service_url.clone());

    let report = startup::validate_environment(&config, &pool).await?;
    report.print();
    if !report.is_valid() {
        tracing::warn!("startup validation reported failures; continuing");
    }

    // Jobs stranded on the working list by a crashed worker go back in line
    // before consumption starts.
    let recovered = queue.recover_working().await?;
    if recovered > 0 {
        tracing::info!("recovered {recovered} in-flight transfer job(s)");
    }

    let worker = TransferWorker::new(pool.clone(), queue.clone(), cache.clone());
    tokio::spawn(worker.run());

    let state = AppState {
        db: pool,
        queue,
        cache,
        accounts,
    };
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("transaction service listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
