use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::OutboxItem;

pub async fn enqueue(
    pool: &PgPool,
    kind: &str,
    recipient: &str,
    subject: &str,
    body: &str,
) -> Result<OutboxItem, sqlx::Error> {
    sqlx::query_as::<_, OutboxItem>(
        "INSERT INTO notification_outbox (kind, recipient, subject, body)
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(kind)
    .bind(recipient)
    .bind(subject)
    .bind(body)
    .fetch_one(pool)
    .await
}

/// Atomically claim the next ready item using SELECT FOR UPDATE SKIP LOCKED.
/// A `processing` row whose claim is older than `lease` belongs to a worker
/// that died mid-delivery and is claimed again.
pub async fn claim_next(
    pool: &PgPool,
    lease: std::time::Duration,
) -> Result<Option<OutboxItem>, sqlx::Error> {
    sqlx::query_as::<_, OutboxItem>(
        "UPDATE notification_outbox
         SET status = 'processing', attempts = attempts + 1, claimed_at = now()
         WHERE id = (
             SELECT id FROM notification_outbox
             WHERE (status IN ('pending', 'failed')
                    AND attempts < max_attempts
                    AND next_retry_at <= now())
                OR (status = 'processing'
                    AND attempts <= max_attempts
                    AND claimed_at < now() - make_interval(secs => $1::double precision))
             ORDER BY next_retry_at ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED
         )
         RETURNING *",
    )
    .bind(lease.as_secs_f64())
    .fetch_optional(pool)
    .await
}

/// Mark delivered. The body is cleared because it may carry a reset link.
pub async fn mark_completed(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE notification_outbox SET status = 'completed', body = '', completed_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_skipped(pool: &PgPool, id: Uuid, reason: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE notification_outbox
         SET status = 'skipped', body = '', last_error = $2, completed_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .bind(reason)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark as failed with exponential backoff. If max attempts reached, stays 'failed' permanently.
pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    attempts: i32,
    max_attempts: i32,
    error: &str,
) -> Result<(), sqlx::Error> {
    if attempts >= max_attempts {
        sqlx::query(
            "UPDATE notification_outbox
             SET status = 'failed', body = '', last_error = $2, completed_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
    } else {
        // 2^attempts seconds
        let backoff_secs = 2_i64.pow(attempts.max(0) as u32);
        sqlx::query(
            "UPDATE notification_outbox
             SET status = 'failed',
                 last_error = $2,
                 next_retry_at = now() + make_interval(secs => $3::double precision)
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(backoff_secs as f64)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn delete_finished_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM notification_outbox
         WHERE completed_at IS NOT NULL AND completed_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn list_for_recipient(
    pool: &PgPool,
    recipient: &str,
) -> Result<Vec<OutboxItem>, sqlx::Error> {
    sqlx::query_as::<_, OutboxItem>(
        "SELECT * FROM notification_outbox WHERE recipient = $1 ORDER BY created_at ASC",
    )
    .bind(recipient)
    .fetch_all(pool)
    .await
}
