use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored password reset token. Only the SHA-256 of the token value is kept.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ResetToken {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewResetToken {
    pub email: String,
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of redeeming a token together with the password write.
#[derive(Debug, Clone)]
pub enum Redemption {
    Redeemed(ResetToken),
    /// Missing, consumed or expired at the time of the attempt; nothing was written.
    NotRedeemable,
    /// The token was redeemable but no account matched; nothing was written.
    AccountMissing,
}

/// The persisted part of a token's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Active,
    Superseded,
    Redeemed,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Superseded => "superseded",
            TokenStatus::Redeemed => "redeemed",
        }
    }

    /// Unknown values read as `Redeemed` so a corrupt row is never usable.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => TokenStatus::Active,
            "superseded" => TokenStatus::Superseded,
            _ => TokenStatus::Redeemed,
        }
    }
}

/// Effective state at a given instant; `Expired` is derived from time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Active,
    Expired,
    Superseded,
    Redeemed,
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenState::Active => "active",
            TokenState::Expired => "expired",
            TokenState::Superseded => "superseded",
            TokenState::Redeemed => "redeemed",
        };
        f.write_str(s)
    }
}

impl ResetToken {
    pub fn status(&self) -> TokenStatus {
        TokenStatus::parse(&self.status)
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> TokenState {
        match self.status() {
            TokenStatus::Redeemed => TokenState::Redeemed,
            TokenStatus::Superseded => TokenState::Superseded,
            TokenStatus::Active if now < self.expires_at && self.used_at.is_none() => {
                TokenState::Active
            }
            TokenStatus::Active => TokenState::Expired,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) == TokenState::Active
    }
}
