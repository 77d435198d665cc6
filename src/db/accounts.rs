use sqlx::PgPool;

use crate::models::Account;

pub async fn create<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    email: &str,
    display_name: &str,
    password_hash: &str,
    role: &str,
) -> Result<Account, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        "INSERT INTO accounts (email, display_name, password_hash, role)
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(email)
    .bind(display_name)
    .bind(password_hash)
    .bind(role)
    .fetch_one(executor)
    .await
}

pub async fn find_by_email_and_role(
    pool: &PgPool,
    email: &str,
    role: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts WHERE lower(email) = lower($1) AND role = $2",
    )
    .bind(email)
    .bind(role)
    .fetch_optional(pool)
    .await
}

/// Returns the number of rows updated (0 or 1).
pub async fn update_password_by_email<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    email: &str,
    role: &str,
    password_hash: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE accounts SET password_hash = $3 WHERE lower(email) = lower($1) AND role = $2",
    )
    .bind(email)
    .bind(role)
    .bind(password_hash)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
