use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::db;
use crate::email::{self, templates};
use crate::models::{NewResetToken, Redemption, ResetToken};

use super::{
    AccountKind, AccountRef, CredentialDirectory, NotificationGateway, StoreError, TokenStore,
};

pub const KIND_RECOVERY_LINK: &str = "password_reset";
pub const KIND_CONFIRMATION: &str = "password_changed";

pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn issue(
        &self,
        token: NewResetToken,
        now: DateTime<Utc>,
    ) -> Result<ResetToken, StoreError> {
        Ok(db::password_reset_tokens::issue(&self.pool, &token, now).await?)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<ResetToken>, StoreError> {
        Ok(db::password_reset_tokens::find_by_hash(&self.pool, token_hash).await?)
    }

    async fn redeem(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        kind: AccountKind,
        password_hash: &str,
    ) -> Result<Redemption, StoreError> {
        let outcome = db::password_reset_tokens::redeem(
            &self.pool,
            token_hash,
            now,
            kind.as_str(),
            password_hash,
        )
        .await?;
        Ok(outcome)
    }

    async fn sweep(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64, StoreError> {
        Ok(db::password_reset_tokens::delete_stale(&self.pool, now - grace).await?)
    }
}

pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialDirectory for PgDirectory {
    async fn lookup_by_email(
        &self,
        email: &str,
        kind: AccountKind,
    ) -> Result<Option<AccountRef>, StoreError> {
        let account =
            db::accounts::find_by_email_and_role(&self.pool, email, kind.as_str()).await?;
        Ok(account.map(|a| AccountRef {
            account_id: a.id,
            email: a.email.to_lowercase(),
            display_name: a.display_name,
        }))
    }
}

/// Renders recovery emails and queues them in `notification_outbox`; the
/// worker pool delivers them with retry.
pub struct OutboxGateway {
    pool: PgPool,
    base_url: String,
    token_ttl: Duration,
}

impl OutboxGateway {
    pub fn new(pool: PgPool, base_url: &str, token_ttl: Duration) -> Self {
        Self {
            pool,
            base_url: base_url.trim_end_matches('/').to_string(),
            token_ttl,
        }
    }

    pub fn reset_url(&self, token: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("token", token)
            .finish();
        format!("{}/password-reset?{query}", self.base_url)
    }
}

#[async_trait]
impl NotificationGateway for OutboxGateway {
    async fn send_recovery_link(
        &self,
        to: &str,
        token: &str,
        display_name: &str,
    ) -> Result<(), String> {
        let html = templates::render_password_reset(
            display_name,
            &self.reset_url(token),
            &templates::describe_lifetime(self.token_ttl),
        );
        db::notification_outbox::enqueue(
            &self.pool,
            KIND_RECOVERY_LINK,
            to,
            email::PASSWORD_RESET_SUBJECT,
            &html,
        )
        .await
        .map_err(|e| format!("Failed to queue password reset email: {e}"))?;
        Ok(())
    }

    async fn send_confirmation(&self, to: &str, display_name: &str) -> Result<(), String> {
        let html = templates::render_password_changed(display_name);
        db::notification_outbox::enqueue(
            &self.pool,
            KIND_CONFIRMATION,
            to,
            email::PASSWORD_CHANGED_SUBJECT,
            &html,
        )
        .await
        .map_err(|e| format!("Failed to queue confirmation email: {e}"))?;
        Ok(())
    }
}
