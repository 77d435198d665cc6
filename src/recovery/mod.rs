//! Credential recovery: issue a single-use, time-bounded token that proves
//! control of an email address, and let its holder set a new password once.

pub mod clock;
pub mod coordinator;
pub mod memory;
pub mod postgres;
pub mod token;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{RecoveryPolicy, ResetCoordinator};

use crate::models::{NewResetToken, Redemption, ResetToken};

/// The account role a recovery flow is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Candidate,
    Employer,
    Admin,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Candidate => "candidate",
            AccountKind::Employer => "employer",
            AccountKind::Admin => "admin",
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "candidate" => Ok(AccountKind::Candidate),
            "employer" => Ok(AccountKind::Employer),
            "admin" => Ok(AccountKind::Admin),
            other => Err(format!("unknown account kind '{other}'")),
        }
    }
}

/// An account resolved by the credential directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRef {
    pub account_id: uuid::Uuid,
    pub email: String,
    pub display_name: String,
}

/// Outcome of a read-only token check. Absent, expired and consumed tokens
/// all collapse to `valid: false` with no email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Verification {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            email: None,
        }
    }
}

/// Why a redemption attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionRejection {
    InvalidToken,
    Expired,
    AlreadyUsed,
}

impl RedemptionRejection {
    pub fn message(&self) -> &'static str {
        match self {
            RedemptionRejection::InvalidToken => "invalid token",
            RedemptionRejection::Expired => "token expired",
            RedemptionRejection::AlreadyUsed => "token already used",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("{}", .0.message())]
    Rejected(RedemptionRejection),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("account for reset token no longer exists")]
    AccountMissing,
}

impl RecoveryError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        RecoveryError::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Durable record of issued reset tokens, keyed by the token hash.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Mark every active, unexpired token for `token.email` superseded and
    /// insert `token`, as one atomic step.
    async fn issue(&self, token: NewResetToken, now: DateTime<Utc>)
    -> Result<ResetToken, StoreError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<ResetToken>, StoreError>;

    /// Mark the token redeemed and store `password_hash` on its account of
    /// `kind`, as one atomic step. Nothing is written unless the token is
    /// active and unexpired at `now` and the account exists; exactly one
    /// concurrent caller can win.
    async fn redeem(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        kind: AccountKind,
        password_hash: &str,
    ) -> Result<Redemption, StoreError>;

    /// Delete rows expired before `now - grace` and consumed rows whose
    /// `used_at` is older than `now - grace`. Returns the number removed.
    async fn sweep(&self, now: DateTime<Utc>, grace: chrono::Duration) -> Result<u64, StoreError>;
}

/// Resolves accounts by email, scoped to one account kind per call.
#[async_trait]
pub trait CredentialDirectory: Send + Sync {
    async fn lookup_by_email(
        &self,
        email: &str,
        kind: AccountKind,
    ) -> Result<Option<AccountRef>, StoreError>;
}

/// Delivers recovery emails.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send_recovery_link(
        &self,
        to: &str,
        token: &str,
        display_name: &str,
    ) -> Result<(), String>;

    async fn send_confirmation(&self, to: &str, display_name: &str) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_kind_parses_case_insensitively() {
        assert_eq!("Employer".parse::<AccountKind>(), Ok(AccountKind::Employer));
        assert_eq!(" candidate ".parse::<AccountKind>(), Ok(AccountKind::Candidate));
        assert!("recruiter".parse::<AccountKind>().is_err());
    }

    #[test]
    fn invalid_verification_hides_email() {
        let body = serde_json::to_value(Verification::invalid()).unwrap();
        assert_eq!(body, serde_json::json!({ "valid": false }));
    }
}
