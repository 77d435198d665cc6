//! In-process implementations of the recovery collaborators. The token store
//! holds its map behind one mutex, which makes `issue` and `redeem` atomic;
//! `redeem` writes to the directory while that lock is held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{NewResetToken, Redemption, ResetToken, TokenStatus};

use super::{
    AccountKind, AccountRef, CredentialDirectory, NotificationGateway, StoreError, TokenStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, ResetToken>>,
    directory: Arc<MemoryDirectory>,
}

impl MemoryTokenStore {
    /// Redemptions write password hashes into `directory`.
    pub fn new(directory: Arc<MemoryDirectory>) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            directory,
        }
    }

    pub fn all(&self) -> Vec<ResetToken> {
        let mut tokens: Vec<_> = lock(&self.tokens).values().cloned().collect();
        tokens.sort_by_key(|t| (t.created_at, t.id));
        tokens
    }

    pub fn for_email(&self, email: &str) -> Vec<ResetToken> {
        self.all().into_iter().filter(|t| t.email == email).collect()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn issue(
        &self,
        token: NewResetToken,
        now: DateTime<Utc>,
    ) -> Result<ResetToken, StoreError> {
        let mut tokens = lock(&self.tokens);

        if tokens.contains_key(&token.token_hash) {
            return Err(StoreError::Backend("duplicate token hash".to_string()));
        }

        for existing in tokens.values_mut() {
            if existing.email == token.email
                && existing.status() == TokenStatus::Active
                && existing.expires_at > now
            {
                existing.status = TokenStatus::Superseded.as_str().to_string();
                existing.used_at = Some(now);
            }
        }

        let created = ResetToken {
            id: Uuid::now_v7(),
            email: token.email,
            token_hash: token.token_hash.clone(),
            status: TokenStatus::Active.as_str().to_string(),
            expires_at: token.expires_at,
            used_at: None,
            created_at: token.issued_at,
        };
        tokens.insert(token.token_hash, created.clone());
        Ok(created)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<ResetToken>, StoreError> {
        Ok(lock(&self.tokens).get(token_hash).cloned())
    }

    async fn redeem(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        kind: AccountKind,
        password_hash: &str,
    ) -> Result<Redemption, StoreError> {
        let mut tokens = lock(&self.tokens);
        let Some(token) = tokens.get_mut(token_hash) else {
            return Ok(Redemption::NotRedeemable);
        };
        if token.status() != TokenStatus::Active || token.expires_at <= now {
            return Ok(Redemption::NotRedeemable);
        }
        if !self.directory.write_password_hash(&token.email, kind, password_hash)? {
            return Ok(Redemption::AccountMissing);
        }
        token.status = TokenStatus::Redeemed.as_str().to_string();
        token.used_at = Some(now);
        Ok(Redemption::Redeemed(token.clone()))
    }

    async fn sweep(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64, StoreError> {
        let cutoff = now - grace;
        let mut tokens = lock(&self.tokens);
        let before = tokens.len();
        tokens.retain(|_, t| {
            let expired = t.expires_at < cutoff;
            let consumed = t.status() != TokenStatus::Active
                && t.used_at.is_some_and(|used| used < cutoff);
            !(expired || consumed)
        });
        Ok((before - tokens.len()) as u64)
    }
}

struct DirectoryEntry {
    account_id: Uuid,
    email: String,
    display_name: String,
    password_hash: String,
    kind: AccountKind,
}

/// Accounts keyed by lowercased email. Password writes can be made to fail.
#[derive(Default)]
pub struct MemoryDirectory {
    accounts: Mutex<HashMap<String, DirectoryEntry>>,
    fail_writes: AtomicBool,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, email: &str, display_name: &str, password_hash: &str, kind: AccountKind) {
        lock(&self.accounts).insert(
            email.to_lowercase(),
            DirectoryEntry {
                account_id: Uuid::now_v7(),
                email: email.to_lowercase(),
                display_name: display_name.to_string(),
                password_hash: password_hash.to_string(),
                kind,
            },
        );
    }

    pub fn remove(&self, email: &str) {
        lock(&self.accounts).remove(&email.to_lowercase());
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn write_password_hash(
        &self,
        email: &str,
        kind: AccountKind,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        let mut accounts = lock(&self.accounts);
        match accounts
            .get_mut(&email.to_lowercase())
            .filter(|entry| entry.kind == kind)
        {
            Some(entry) => {
                entry.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn password_hash(&self, email: &str, kind: AccountKind) -> Option<String> {
        lock(&self.accounts)
            .get(&email.to_lowercase())
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.password_hash.clone())
    }
}

#[async_trait]
impl CredentialDirectory for MemoryDirectory {
    async fn lookup_by_email(
        &self,
        email: &str,
        kind: AccountKind,
    ) -> Result<Option<AccountRef>, StoreError> {
        Ok(lock(&self.accounts)
            .get(&email.to_lowercase())
            .filter(|entry| entry.kind == kind)
            .map(|entry| AccountRef {
                account_id: entry.account_id,
                email: entry.email.clone(),
                display_name: entry.display_name.clone(),
            }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentLink {
    pub to: String,
    pub token: String,
    pub display_name: String,
}

/// Records notifications instead of sending them. Either kind can be made to fail.
#[derive(Default)]
pub struct MemoryGateway {
    links: Mutex<Vec<SentLink>>,
    confirmations: Mutex<Vec<String>>,
    fail_links: AtomicBool,
    fail_confirmations: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_links(&self, fail: bool) {
        self.fail_links.store(fail, Ordering::SeqCst);
    }

    pub fn fail_confirmations(&self, fail: bool) {
        self.fail_confirmations.store(fail, Ordering::SeqCst);
    }

    pub fn links(&self) -> Vec<SentLink> {
        lock(&self.links).clone()
    }

    pub fn last_link(&self) -> Option<SentLink> {
        lock(&self.links).last().cloned()
    }

    pub fn confirmations(&self) -> Vec<String> {
        lock(&self.confirmations).clone()
    }
}

#[async_trait]
impl NotificationGateway for MemoryGateway {
    async fn send_recovery_link(
        &self,
        to: &str,
        token: &str,
        display_name: &str,
    ) -> Result<(), String> {
        if self.fail_links.load(Ordering::SeqCst) {
            return Err(format!("mailbox unavailable for {to}"));
        }
        lock(&self.links).push(SentLink {
            to: to.to_string(),
            token: token.to_string(),
            display_name: display_name.to_string(),
        });
        Ok(())
    }

    async fn send_confirmation(&self, to: &str, _display_name: &str) -> Result<(), String> {
        if self.fail_confirmations.load(Ordering::SeqCst) {
            return Err(format!("mailbox unavailable for {to}"));
        }
        lock(&self.confirmations).push(to.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::token;

    fn new_token(email: &str, now: DateTime<Utc>) -> NewResetToken {
        let value = token::generate();
        NewResetToken {
            email: email.to_string(),
            token_hash: token::hash(&value),
            issued_at: now,
            expires_at: now + Duration::minutes(5),
        }
    }

    fn store_with_account(email: &str) -> (MemoryTokenStore, Arc<MemoryDirectory>) {
        let directory = Arc::new(MemoryDirectory::new());
        directory.insert(email, "Ada", "old", AccountKind::Candidate);
        (MemoryTokenStore::new(directory.clone()), directory)
    }

    #[tokio::test]
    async fn redeem_succeeds_once() {
        let (store, directory) = store_with_account("a@b.io");
        let now = Utc::now();
        let issued = store.issue(new_token("a@b.io", now), now).await.unwrap();

        let first = store
            .redeem(&issued.token_hash, now, AccountKind::Candidate, "new")
            .await
            .unwrap();
        assert!(matches!(first, Redemption::Redeemed(_)));
        let second = store
            .redeem(&issued.token_hash, now, AccountKind::Candidate, "newer")
            .await
            .unwrap();
        assert!(matches!(second, Redemption::NotRedeemable));
        assert_eq!(
            directory.password_hash("a@b.io", AccountKind::Candidate).as_deref(),
            Some("new")
        );
    }

    #[tokio::test]
    async fn redeem_refuses_expired_token() {
        let (store, _) = store_with_account("a@b.io");
        let now = Utc::now();
        let issued = store.issue(new_token("a@b.io", now), now).await.unwrap();

        let later = now + Duration::minutes(5);
        let outcome = store
            .redeem(&issued.token_hash, later, AccountKind::Candidate, "new")
            .await
            .unwrap();
        assert!(matches!(outcome, Redemption::NotRedeemable));
    }

    #[tokio::test]
    async fn failed_write_leaves_token_active() {
        let (store, directory) = store_with_account("a@b.io");
        let now = Utc::now();
        let issued = store.issue(new_token("a@b.io", now), now).await.unwrap();

        directory.fail_writes(true);
        let err = store
            .redeem(&issued.token_hash, now, AccountKind::Candidate, "new")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        let stored = store.find_by_hash(&issued.token_hash).await.unwrap().unwrap();
        assert!(stored.is_valid_at(now));

        directory.fail_writes(false);
        let outcome = store
            .redeem(&issued.token_hash, now, AccountKind::Candidate, "new")
            .await
            .unwrap();
        assert!(matches!(outcome, Redemption::Redeemed(_)));
    }

    #[tokio::test]
    async fn missing_account_leaves_token_active() {
        let (store, directory) = store_with_account("a@b.io");
        let now = Utc::now();
        let issued = store.issue(new_token("a@b.io", now), now).await.unwrap();
        directory.remove("a@b.io");

        let outcome = store
            .redeem(&issued.token_hash, now, AccountKind::Candidate, "new")
            .await
            .unwrap();
        assert!(matches!(outcome, Redemption::AccountMissing));
        let stored = store.find_by_hash(&issued.token_hash).await.unwrap().unwrap();
        assert!(stored.is_valid_at(now));
    }

    #[tokio::test]
    async fn sweep_keeps_active_tokens() {
        let store = MemoryTokenStore::new(Arc::new(MemoryDirectory::new()));
        let t0 = Utc::now();
        let old = store.issue(new_token("a@b.io", t0), t0).await.unwrap();
        let t1 = t0 + Duration::hours(3);
        let fresh = store.issue(new_token("c@d.io", t1), t1).await.unwrap();

        let removed = store.sweep(t1, Duration::hours(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.find_by_hash(&old.token_hash).await.unwrap().is_none());
        assert!(store.find_by_hash(&fresh.token_hash).await.unwrap().is_some());
    }
}
