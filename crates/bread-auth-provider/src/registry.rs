//! Collaborator seams: client registry and user authenticator.
//!
//! Both are read-only lookups from the grant engine's perspective. The
//! storage engine behind them is out of scope; the in-memory
//! implementations here serve tests and single-process embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use bread_auth_core::error::Result;

use crate::client::{hash_client_secret, verify_client_secret};
use crate::scope::ScopeSet;
use crate::types::{Client, Principal};

/// Resolves a client identifier to its registered record.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Look up a client. `Ok(None)` means unknown; infrastructure
    /// failures (timeouts, unreachable backend) are `Err`.
    async fn find_client(&self, client_id: &str) -> Result<Option<Client>>;
}

/// Verifies resource-owner credentials and returns the authenticated
/// principal.
#[async_trait]
pub trait UserAuthenticator: Send + Sync {
    /// `Ok(None)` for any credential failure, with no distinction
    /// between unknown username and wrong password.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<Principal>>;
}

/// In-memory client registry.
#[derive(Debug, Default)]
pub struct MemoryClientRegistry {
    clients: RwLock<HashMap<String, Client>>,
}

impl MemoryClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, client: Client) {
        self.clients
            .write()
            .await
            .insert(client.client_id.clone(), client);
    }
}

#[async_trait]
impl ClientRegistry for MemoryClientRegistry {
    async fn find_client(&self, client_id: &str) -> Result<Option<Client>> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }
}

#[derive(Debug, Clone)]
struct MemoryUser {
    principal: Principal,
    password_hash: String,
}

/// In-memory user directory, keyed by username.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, MemoryUser>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user and return its generated id.
    pub async fn add_user(
        &self,
        username: &str,
        password: &str,
        authorities: Vec<String>,
        scopes: ScopeSet,
    ) -> String {
        let user_id = bread_auth_core::id::generate_id();
        let user = MemoryUser {
            principal: Principal {
                user_id: user_id.clone(),
                username: username.to_string(),
                authorities,
                scopes,
            },
            password_hash: hash_client_secret(password),
        };
        self.users.write().await.insert(username.to_string(), user);
        user_id
    }
}

#[async_trait]
impl UserAuthenticator for MemoryUserDirectory {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<Principal>> {
        let users = self.users.read().await;
        match users.get(username) {
            Some(user) if verify_client_secret(password, &user.password_hash) => {
                Ok(Some(user.principal.clone()))
            }
            _ => Ok(None),
        }
    }
}
