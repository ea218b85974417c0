//! Token and authorization-code storage.
//!
//! The code store is the one piece of shared mutable state with a strict
//! concurrency contract: consuming a code is a single atomic
//! remove-then-verify, so two exchanges racing on the same code can
//! never both succeed. Expiry is enforced lazily at read time; the
//! sweep is reclamation only.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use bread_auth_core::error::{CoreError, Result};

use crate::pkce::PkceChallenge;
use crate::types::{
    AccessTokenRecord, Authentication, AuthorizationCodeRecord, RefreshTokenRecord,
};

/// Generate an opaque, collision-resistant token or code value
/// (256 bits of entropy, base64url).
pub fn generate_token_value() -> String {
    URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}

/// Short-lived, single-use authorization codes bound to a PKCE
/// commitment and a pending authentication.
#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync {
    /// Store a pending authentication under a fresh random code.
    async fn issue(
        &self,
        authentication: Authentication,
        pkce: Option<PkceChallenge>,
    ) -> Result<String>;

    /// Atomic check-and-delete. The record is removed before the
    /// verifier is checked, so a second call with the same code always
    /// observes "absent" and a failed verifier check cannot be retried.
    /// `Ok(None)` covers absent, expired, and verifier-mismatch alike.
    async fn consume_and_verify(&self, code: &str, verifier: &str)
        -> Result<Option<Authentication>>;
}

/// In-memory code store with TTL from construction time.
#[derive(Debug)]
pub struct MemoryCodeStore {
    entries: Mutex<HashMap<String, AuthorizationCodeRecord>>,
    ttl: Duration,
}

impl MemoryCodeStore {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Drop expired records. Convenience for long-running processes;
    /// correctness never depends on it running.
    pub fn sweep(&self) {
        let now = Utc::now();
        // Expiry is re-checked on every read, so a map behind a
        // poisoned lock is still safe to reclaim from.
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, record| !record.is_expired(now));
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuthorizationCodeStore for MemoryCodeStore {
    async fn issue(
        &self,
        authentication: Authentication,
        pkce: Option<PkceChallenge>,
    ) -> Result<String> {
        let code = generate_token_value();
        let now = Utc::now();
        let record = AuthorizationCodeRecord {
            code: code.clone(),
            pkce,
            authentication,
            created_at: now,
            expires_at: now + self.ttl,
        };
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::Storage("code store lock poisoned".into()))?;
        entries.insert(code.clone(), record);
        Ok(code)
    }

    async fn consume_and_verify(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<Option<Authentication>> {
        // Remove first, verify after: the code is spent whatever happens next.
        let record = {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| CoreError::Storage("code store lock poisoned".into()))?;
            entries.remove(code)
        };
        let Some(record) = record else {
            return Ok(None);
        };
        if record.is_expired(Utc::now()) {
            return Ok(None);
        }
        match &record.pkce {
            Some(challenge) if !challenge.verify(verifier) => Ok(None),
            _ => Ok(Some(record.authentication)),
        }
    }
}

/// Storage for minted access and refresh tokens, the decoder behind
/// introspection and the refresh grant.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save_access_token(&self, record: AccessTokenRecord) -> Result<()>;

    /// `Ok(None)` for unknown or expired tokens.
    async fn find_access_token(&self, token: &str) -> Result<Option<AccessTokenRecord>>;

    async fn save_refresh_token(&self, record: RefreshTokenRecord) -> Result<()>;

    /// `Ok(None)` for unknown or expired tokens.
    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Invalidate `old_token` and store its replacement in one step, so
    /// a rotated-out token can never be replayed alongside its successor.
    async fn replace_refresh_token(&self, old_token: &str, record: RefreshTokenRecord)
        -> Result<()>;
}

/// In-memory token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    access_tokens: RwLock<HashMap<String, AccessTokenRecord>>,
    refresh_tokens: RwLock<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn access_token_count(&self) -> usize {
        self.access_tokens.read().await.len()
    }

    pub async fn refresh_token_count(&self) -> usize {
        self.refresh_tokens.read().await.len()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save_access_token(&self, record: AccessTokenRecord) -> Result<()> {
        self.access_tokens
            .write()
            .await
            .insert(record.token.clone(), record);
        Ok(())
    }

    async fn find_access_token(&self, token: &str) -> Result<Option<AccessTokenRecord>> {
        let mut tokens = self.access_tokens.write().await;
        match tokens.get(token) {
            Some(record) if record.is_expired(Utc::now()) => {
                tokens.remove(token);
                Ok(None)
            }
            other => Ok(other.cloned()),
        }
    }

    async fn save_refresh_token(&self, record: RefreshTokenRecord) -> Result<()> {
        self.refresh_tokens
            .write()
            .await
            .insert(record.token.clone(), record);
        Ok(())
    }

    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>> {
        let mut tokens = self.refresh_tokens.write().await;
        match tokens.get(token) {
            Some(record) if record.is_expired(Utc::now()) => {
                tokens.remove(token);
                Ok(None)
            }
            other => Ok(other.cloned()),
        }
    }

    async fn replace_refresh_token(
        &self,
        old_token: &str,
        record: RefreshTokenRecord,
    ) -> Result<()> {
        let mut tokens = self.refresh_tokens.write().await;
        tokens.remove(old_token);
        tokens.insert(record.token.clone(), record);
        Ok(())
    }
}
