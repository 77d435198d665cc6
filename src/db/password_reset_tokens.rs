use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db::accounts;
use crate::models::{NewResetToken, Redemption, ResetToken};

/// Supersede every live token for the email and insert the new one in a
/// single transaction. A per-email advisory lock serializes concurrent
/// issuance so two requests can never both leave an active token behind.
pub async fn issue(
    pool: &PgPool,
    token: &NewResetToken,
    now: DateTime<Utc>,
) -> Result<ResetToken, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext('password_reset:' || $1))")
        .bind(&token.email)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "UPDATE password_reset_tokens SET status = 'superseded', used_at = $2
         WHERE email = $1 AND status = 'active' AND expires_at > $2",
    )
    .bind(&token.email)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let created = sqlx::query_as::<_, ResetToken>(
        "INSERT INTO password_reset_tokens (email, token_hash, expires_at, created_at)
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(&token.email)
    .bind(&token.token_hash)
    .bind(token.expires_at)
    .bind(token.issued_at)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(created)
}

pub async fn find_by_hash(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<ResetToken>, sqlx::Error> {
    sqlx::query_as::<_, ResetToken>("SELECT * FROM password_reset_tokens WHERE token_hash = $1")
        .bind(token_hash)
        .fetch_optional(pool)
        .await
}

pub async fn list_by_email(pool: &PgPool, email: &str) -> Result<Vec<ResetToken>, sqlx::Error> {
    sqlx::query_as::<_, ResetToken>(
        "SELECT * FROM password_reset_tokens WHERE email = $1 ORDER BY created_at ASC",
    )
    .bind(email)
    .fetch_all(pool)
    .await
}

/// Redeem a token and write the new password hash in one transaction. The
/// token update only matches an active, unexpired row, so exactly one
/// concurrent caller can win; if the account write fails or matches nothing
/// the transaction rolls back and the token stays active.
pub async fn redeem(
    pool: &PgPool,
    token_hash: &str,
    now: DateTime<Utc>,
    role: &str,
    password_hash: &str,
) -> Result<Redemption, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let claimed = sqlx::query_as::<_, ResetToken>(
        "UPDATE password_reset_tokens SET status = 'redeemed', used_at = $2
         WHERE token_hash = $1 AND status = 'active' AND expires_at > $2
         RETURNING *",
    )
    .bind(token_hash)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(claimed) = claimed else {
        tx.rollback().await?;
        return Ok(Redemption::NotRedeemable);
    };

    let updated =
        accounts::update_password_by_email(&mut *tx, &claimed.email, role, password_hash).await?;
    if updated == 0 {
        tx.rollback().await?;
        return Ok(Redemption::AccountMissing);
    }

    tx.commit().await?;
    Ok(Redemption::Redeemed(claimed))
}

pub async fn delete_stale(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM password_reset_tokens
         WHERE expires_at < $1
            OR (status <> 'active' AND used_at < $1)",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
