use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::watch;

use crate::db;
use crate::email::SystemMailer;

const DELIVERY_TIMEOUT_SECS: u64 = 30;

/// How long a claimed item may stay `processing` before another worker takes
/// it over. Must exceed the delivery timeout.
pub const CLAIM_LEASE: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Start the notification delivery pool on a dedicated Tokio runtime with its
/// own thread pool. Runs on a separate OS thread until shutdown is signaled.
pub fn run_pool(
    pool: PgPool,
    mailer: Option<Arc<SystemMailer>>,
    shutdown: watch::Receiver<bool>,
    worker_count: usize,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("notification-pool".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(worker_count)
                .thread_name("notification-worker")
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!("Failed to build notification runtime: {e}");
                    return;
                }
            };

            runtime.block_on(async {
                let mut handles = Vec::with_capacity(worker_count);

                for id in 0..worker_count {
                    handles.push(tokio::spawn(run(
                        id,
                        pool.clone(),
                        mailer.clone(),
                        shutdown.clone(),
                    )));
                }

                tracing::info!("Notification worker pool started ({worker_count} workers)");

                for handle in handles {
                    let _ = handle.await;
                }

                tracing::info!("Notification worker pool stopped");
            });
        })
}

/// A single worker loop that polls the outbox and delivers items.
async fn run(
    id: usize,
    pool: PgPool,
    mailer: Option<Arc<SystemMailer>>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Notification worker {id} started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match process_next(&pool, mailer.as_deref()).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::error!("Notification worker {id} error: {e}");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
            _ = shutdown.changed() => {}
        }
    }

    tracing::debug!("Notification worker {id} stopped");
}

/// Try to claim and deliver the next outbox item. Returns true if an item was handled.
async fn process_next(pool: &PgPool, mailer: Option<&SystemMailer>) -> Result<bool, String> {
    let item = db::notification_outbox::claim_next(pool, CLAIM_LEASE)
        .await
        .map_err(|e| format!("Failed to claim outbox item: {e}"))?;

    let Some(item) = item else {
        return Ok(false);
    };

    tracing::debug!(
        outbox_id = %item.id,
        kind = %item.kind,
        attempt = item.attempts,
        "Delivering notification"
    );

    let Some(mailer) = mailer else {
        tracing::warn!(
            outbox_id = %item.id,
            kind = %item.kind,
            "System SMTP not configured, dropping notification"
        );
        db::notification_outbox::mark_skipped(pool, item.id, "smtp not configured")
            .await
            .map_err(|e| format!("Failed to update outbox item: {e}"))?;
        return Ok(true);
    };

    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(DELIVERY_TIMEOUT_SECS),
        mailer.send(&item.recipient, &item.subject, &item.body),
    )
    .await
    .unwrap_or_else(|_| Err(format!("Delivery timed out after {DELIVERY_TIMEOUT_SECS}s")));

    match outcome {
        Ok(()) => {
            db::notification_outbox::mark_completed(pool, item.id)
                .await
                .map_err(|e| format!("Failed to update outbox item: {e}"))?;
            tracing::info!(outbox_id = %item.id, kind = %item.kind, "Notification delivered");
        }
        Err(error) => {
            tracing::warn!(
                outbox_id = %item.id,
                kind = %item.kind,
                attempt = item.attempts,
                max_attempts = item.max_attempts,
                "Notification delivery failed: {error}"
            );
            db::notification_outbox::mark_failed(
                pool,
                item.id,
                item.attempts,
                item.max_attempts,
                &error,
            )
            .await
            .map_err(|e| format!("Failed to update outbox item: {e}"))?;
        }
    }

    Ok(true)
}
