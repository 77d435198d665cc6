use std::net::SocketAddr;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use jobboard::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env().expect("Failed to load configuration");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(&config.log_level)
        }))
        .init();

    tracing::info!(
        token_ttl_minutes = config.recovery.token_ttl.num_minutes(),
        account_kind = %config.recovery.account_kind,
        "Starting job board"
    );

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations applied");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = jobboard::worker::run_pool(
        pool.clone(),
        jobboard::system_mailer(&config),
        shutdown_rx,
        config.worker_count,
    )?;

    let addr = SocketAddr::new(config.host, config.port);
    let (app, state) = jobboard::build_app(pool, config);

    // Prune rate limiter windows
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5 * 60));
        loop {
            interval.tick().await;
            cleanup_state
                .issuance_limiter
                .cleanup(cleanup_state.issuance_limiter.window());
            cleanup_state
                .attempt_limiter
                .cleanup(cleanup_state.attempt_limiter.window());
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Finish recovery requests that were accepted before the signal
    if tokio::time::timeout(Duration::from_secs(10), state.background.drain())
        .await
        .is_err()
    {
        tracing::warn!("Timed out waiting for background recovery tasks");
    }

    let _ = shutdown_tx.send(true);
    match tokio::task::spawn_blocking(move || workers.join()).await {
        Ok(Ok(())) => {}
        _ => tracing::error!("Notification worker pool did not shut down cleanly"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
