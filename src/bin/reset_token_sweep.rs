use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use jobboard::config::Config;
use jobboard::db;
use jobboard::recovery::postgres::PgTokenStore;
use jobboard::recovery::TokenStore;

/// One-shot retention sweep for password reset tokens and delivered notifications.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(&config.log_level)
        }))
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await?;

    let now = Utc::now();
    let grace = config.recovery.retention_grace;

    let deleted_tokens = PgTokenStore::new(pool.clone()).sweep(now, grace).await?;
    if deleted_tokens > 0 {
        tracing::info!("Deleted {deleted_tokens} stale password reset tokens");
    }

    let deleted_notifications =
        db::notification_outbox::delete_finished_before(&pool, now - grace).await?;
    if deleted_notifications > 0 {
        tracing::info!("Deleted {deleted_notifications} finished notifications");
    }

    pool.close().await;
    Ok(())
}
