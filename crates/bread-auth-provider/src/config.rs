//! Provider configuration: default TTLs and issuance policy.

use serde::{Deserialize, Serialize};

/// Provider-wide options. Per-client TTL overrides on `Client` win over
/// the defaults here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOptions {
    /// Access token TTL in seconds.
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl: i64,
    /// Refresh token TTL in seconds.
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl: i64,
    /// Authorization code TTL in seconds.
    #[serde(default = "default_code_ttl")]
    pub authorization_code_ttl: i64,
    /// Require a PKCE challenge from public clients at authorization time.
    #[serde(default = "default_true")]
    pub require_pkce: bool,
    /// Rotate refresh tokens on the refresh grant. The replaced token is
    /// always invalidated when rotation is on.
    #[serde(default = "default_true")]
    pub rotate_refresh_tokens: bool,
    /// Audience values reported by introspection.
    #[serde(default = "default_resource_ids")]
    pub resource_ids: Vec<String>,
    /// When set, only clients holding this scope may call introspection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_scope: Option<String>,
}

fn default_access_token_ttl() -> i64 {
    3600 // 1 hour
}

fn default_refresh_token_ttl() -> i64 {
    2_592_000 // 30 days
}

fn default_code_ttl() -> i64 {
    600 // 10 minutes
}

fn default_true() -> bool {
    true
}

fn default_resource_ids() -> Vec<String> {
    vec!["auth".to_string()]
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            access_token_ttl: default_access_token_ttl(),
            refresh_token_ttl: default_refresh_token_ttl(),
            authorization_code_ttl: default_code_ttl(),
            require_pkce: true,
            rotate_refresh_tokens: true,
            resource_ids: default_resource_ids(),
            introspection_scope: None,
        }
    }
}
