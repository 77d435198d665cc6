use std::sync::{Arc, LazyLock};

use chrono::Duration;
use regex::Regex;

use crate::auth::password;
use crate::config::RecoveryConfig;
use crate::models::{NewResetToken, Redemption, ResetToken, TokenState};

use super::{
    token, AccountKind, Clock, CredentialDirectory, NotificationGateway, RecoveryError,
    RedemptionRejection, TokenStore, Verification,
};

pub const MIN_PASSWORD_LENGTH: usize = 8;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").unwrap());

#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    pub token_ttl: Duration,
    pub account_kind: AccountKind,
}

impl From<&RecoveryConfig> for RecoveryPolicy {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            token_ttl: config.token_ttl,
            account_kind: config.account_kind,
        }
    }
}

/// Drives the forgot / verify / reset state machine over its collaborators.
pub struct ResetCoordinator {
    store: Arc<dyn TokenStore>,
    directory: Arc<dyn CredentialDirectory>,
    notifier: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    policy: RecoveryPolicy,
}

impl ResetCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        directory: Arc<dyn CredentialDirectory>,
        notifier: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            store,
            directory,
            notifier,
            clock,
            policy,
        }
    }

    /// Issue a reset token for `email` and send the link.
    ///
    /// Unknown emails succeed without side effects. A failed link delivery is
    /// logged and swallowed so it cannot be told apart from the unknown case.
    pub async fn request_recovery(&self, email: &str) -> Result<(), RecoveryError> {
        let email = validate_email(email)?;

        let account = match self
            .directory
            .lookup_by_email(&email, self.policy.account_kind)
            .await?
        {
            Some(account) => account,
            None => {
                tracing::debug!(
                    account_kind = %self.policy.account_kind,
                    "Recovery requested for unknown email"
                );
                return Ok(());
            }
        };

        let now = self.clock.now();
        let value = token::generate();
        let issued = self
            .store
            .issue(
                NewResetToken {
                    email: account.email.clone(),
                    token_hash: token::hash(&value),
                    issued_at: now,
                    expires_at: now + self.policy.token_ttl,
                },
                now,
            )
            .await?;

        tracing::info!(
            token_id = %issued.id,
            account_id = %account.account_id,
            account_kind = %self.policy.account_kind,
            expires_at = %issued.expires_at,
            "Password reset token issued"
        );

        if let Err(e) = self
            .notifier
            .send_recovery_link(&account.email, &value, &account.display_name)
            .await
        {
            tracing::error!(token_id = %issued.id, "Failed to dispatch password reset link: {e}");
        }

        Ok(())
    }

    /// Read-only check used by clients before rendering the new-password form.
    pub async fn verify_token(&self, value: &str) -> Result<Verification, RecoveryError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(RecoveryError::validation("token", "token is required"));
        }

        let now = self.clock.now();
        let verification = match self.store.find_by_hash(&token::hash(value)).await? {
            Some(stored) if stored.is_valid_at(now) => Verification {
                valid: true,
                email: Some(stored.email),
            },
            _ => Verification::invalid(),
        };
        Ok(verification)
    }

    /// Redeem a token and set a new password. The token update and the
    /// password write commit together, so of several concurrent calls with
    /// the same token at most one succeeds, and a failed write leaves the
    /// token usable.
    pub async fn execute_reset(&self, value: &str, new_password: &str) -> Result<(), RecoveryError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(RecoveryError::validation("token", "token is required"));
        }

        let token_hash = token::hash(value);
        let current = self.store.find_by_hash(&token_hash).await?;
        let current = check_redeemable(current, self.clock.now())?;

        if new_password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(RecoveryError::validation(
                "new_password",
                format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
            ));
        }

        let password_hash = password::hash_blocking(new_password.to_string())
            .await
            .map_err(RecoveryError::Hashing)?;

        let redemption = self
            .store
            .redeem(
                &token_hash,
                self.clock.now(),
                self.policy.account_kind,
                &password_hash,
            )
            .await?;

        let redeemed = match redemption {
            Redemption::Redeemed(token) => token,
            Redemption::NotRedeemable => {
                // Lost the race, or the token lapsed while hashing.
                let latest = self.store.find_by_hash(&token_hash).await?;
                check_redeemable(latest, self.clock.now())?;
                return Err(RecoveryError::Rejected(RedemptionRejection::AlreadyUsed));
            }
            Redemption::AccountMissing => {
                tracing::error!(
                    token_id = %current.id,
                    account_kind = %self.policy.account_kind,
                    "Reset token has no matching account"
                );
                return Err(RecoveryError::AccountMissing);
            }
        };

        tracing::info!(
            token_id = %redeemed.id,
            state = %TokenState::Redeemed,
            account_kind = %self.policy.account_kind,
            "Password reset completed"
        );

        self.send_confirmation(&redeemed).await;
        Ok(())
    }

    async fn send_confirmation(&self, token: &ResetToken) {
        let display_name = match self
            .directory
            .lookup_by_email(&token.email, self.policy.account_kind)
            .await
        {
            Ok(Some(account)) => account.display_name,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(token_id = %token.id, "Skipping reset confirmation: {e}");
                return;
            }
        };

        if let Err(e) = self
            .notifier
            .send_confirmation(&token.email, &display_name)
            .await
        {
            tracing::warn!(token_id = %token.id, "Failed to send reset confirmation: {e}");
        }
    }
}

/// Map a stored token to the specific reason it cannot be redeemed at `now`.
fn check_redeemable(
    token: Option<ResetToken>,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<ResetToken, RecoveryError> {
    let Some(token) = token else {
        return Err(RecoveryError::Rejected(RedemptionRejection::InvalidToken));
    };
    match token.state_at(now) {
        TokenState::Active => Ok(token),
        TokenState::Expired => Err(RecoveryError::Rejected(RedemptionRejection::Expired)),
        TokenState::Superseded | TokenState::Redeemed => {
            Err(RecoveryError::Rejected(RedemptionRejection::AlreadyUsed))
        }
    }
}

/// Trim and lowercase an email, rejecting empty or obviously malformed input.
pub fn validate_email(email: &str) -> Result<String, RecoveryError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(RecoveryError::validation("email", "email is required"));
    }
    if !EMAIL_RE.is_match(&email) {
        return Err(RecoveryError::validation(
            "email",
            "email is not a valid address",
        ));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::clock::ManualClock;
    use crate::recovery::memory::{MemoryDirectory, MemoryGateway, MemoryTokenStore};
    use crate::recovery::StoreError;
    use chrono::Utc;

    struct Harness {
        coordinator: ResetCoordinator,
        store: Arc<MemoryTokenStore>,
        directory: Arc<MemoryDirectory>,
        gateway: Arc<MemoryGateway>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let directory = Arc::new(MemoryDirectory::new());
        let store = Arc::new(MemoryTokenStore::new(directory.clone()));
        let gateway = Arc::new(MemoryGateway::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        directory.insert("user@example.com", "Ada", "old-password", AccountKind::Candidate);
        let coordinator = ResetCoordinator::new(
            store.clone(),
            directory.clone(),
            gateway.clone(),
            clock.clone(),
            RecoveryPolicy {
                token_ttl: Duration::minutes(5),
                account_kind: AccountKind::Candidate,
            },
        );
        Harness {
            coordinator,
            store,
            directory,
            gateway,
            clock,
        }
    }

    #[tokio::test]
    async fn unknown_email_has_no_side_effects() {
        let h = harness();
        h.coordinator
            .request_recovery("nobody@example.com")
            .await
            .unwrap();
        assert!(h.store.all().is_empty());
        assert!(h.gateway.links().is_empty());
    }

    #[tokio::test]
    async fn other_account_kinds_are_not_resolved() {
        let h = harness();
        h.directory
            .insert("boss@example.com", "Boss", "pw", AccountKind::Employer);
        h.coordinator.request_recovery("boss@example.com").await.unwrap();
        assert!(h.store.all().is_empty());
    }

    #[tokio::test]
    async fn email_is_normalized_before_lookup() {
        let h = harness();
        h.coordinator
            .request_recovery("  USER@Example.com ")
            .await
            .unwrap();
        assert_eq!(h.gateway.links().len(), 1);
    }

    #[tokio::test]
    async fn empty_email_is_a_validation_error() {
        let h = harness();
        let err = h.coordinator.request_recovery("   ").await.unwrap_err();
        assert!(matches!(err, RecoveryError::Validation { field: "email", .. }));
    }

    #[tokio::test]
    async fn delivery_failure_does_not_fail_issuance() {
        let h = harness();
        h.gateway.fail_links(true);
        h.coordinator.request_recovery("user@example.com").await.unwrap();
        assert_eq!(h.store.all().len(), 1);
    }

    #[tokio::test]
    async fn link_carries_token_and_display_name() {
        let h = harness();
        h.coordinator.request_recovery("user@example.com").await.unwrap();
        let link = h.gateway.last_link().unwrap();
        assert_eq!(link.to, "user@example.com");
        assert_eq!(link.display_name, "Ada");
        assert_eq!(h.store.all()[0].token_hash, token::hash(&link.token));
    }

    #[tokio::test]
    async fn verify_reports_email_only_while_valid() {
        let h = harness();
        h.coordinator.request_recovery("user@example.com").await.unwrap();
        let value = h.gateway.last_link().unwrap().token;

        h.clock.advance(Duration::minutes(4));
        let ok = h.coordinator.verify_token(&value).await.unwrap();
        assert_eq!(ok.email.as_deref(), Some("user@example.com"));

        h.clock.advance(Duration::minutes(2));
        assert_eq!(
            h.coordinator.verify_token(&value).await.unwrap(),
            Verification::invalid()
        );
    }

    #[tokio::test]
    async fn reset_reasons_are_specific() {
        let h = harness();
        let err = h
            .coordinator
            .execute_reset("not-a-token", "longenough")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::Rejected(RedemptionRejection::InvalidToken)
        ));

        h.coordinator.request_recovery("user@example.com").await.unwrap();
        let value = h.gateway.last_link().unwrap().token;
        h.clock.advance(Duration::minutes(6));
        let err = h
            .coordinator
            .execute_reset(&value, "longenough")
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::Rejected(RedemptionRejection::Expired)));
    }

    #[tokio::test]
    async fn short_password_is_rejected_without_consuming_token() {
        let h = harness();
        h.coordinator.request_recovery("user@example.com").await.unwrap();
        let value = h.gateway.last_link().unwrap().token;

        let err = h.coordinator.execute_reset(&value, "seven77").await.unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::Validation {
                field: "new_password",
                ..
            }
        ));
        assert!(h.coordinator.verify_token(&value).await.unwrap().valid);
    }

    #[tokio::test]
    async fn successful_reset_updates_hash_and_confirms() {
        let h = harness();
        h.coordinator.request_recovery("user@example.com").await.unwrap();
        let value = h.gateway.last_link().unwrap().token;

        h.coordinator.execute_reset(&value, "new-password").await.unwrap();

        let stored = h
            .directory
            .password_hash("user@example.com", AccountKind::Candidate)
            .unwrap();
        assert!(password::verify("new-password", &stored).unwrap());
        assert_eq!(h.gateway.confirmations(), vec!["user@example.com".to_string()]);
    }

    #[tokio::test]
    async fn confirmation_failure_is_not_surfaced() {
        let h = harness();
        h.gateway.fail_confirmations(true);
        h.coordinator.request_recovery("user@example.com").await.unwrap();
        let value = h.gateway.last_link().unwrap().token;
        h.coordinator.execute_reset(&value, "new-password").await.unwrap();
    }

    #[tokio::test]
    async fn deleted_account_surfaces_as_missing_and_keeps_token() {
        let h = harness();
        h.coordinator.request_recovery("user@example.com").await.unwrap();
        let value = h.gateway.last_link().unwrap().token;
        h.directory.remove("user@example.com");

        let err = h
            .coordinator
            .execute_reset(&value, "new-password")
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::AccountMissing));
        assert!(h.coordinator.verify_token(&value).await.unwrap().valid);
        assert!(h.gateway.confirmations().is_empty());
    }

    #[tokio::test]
    async fn failed_password_write_does_not_burn_token() {
        let h = harness();
        h.coordinator.request_recovery("user@example.com").await.unwrap();
        let value = h.gateway.last_link().unwrap().token;

        h.directory.fail_writes(true);
        let err = h
            .coordinator
            .execute_reset(&value, "new-password")
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::Store(StoreError::Backend(_))));
        assert_eq!(
            h.store.all()[0].state_at(h.clock.now()),
            TokenState::Active
        );
        let unchanged = h
            .directory
            .password_hash("user@example.com", AccountKind::Candidate)
            .unwrap();
        assert_eq!(unchanged, "old-password");

        h.directory.fail_writes(false);
        h.coordinator.execute_reset(&value, "new-password").await.unwrap();
        let stored = h
            .directory
            .password_hash("user@example.com", AccountKind::Candidate)
            .unwrap();
        assert!(password::verify("new-password", &stored).unwrap());
    }

    #[test]
    fn email_validation() {
        assert_eq!(validate_email(" A@B.io ").unwrap(), "a@b.io");
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("two@@signs").is_err());
    }
}
