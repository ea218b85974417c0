//! Data model: clients, principals, requests, authentications, and tokens.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pkce::PkceChallenge;
use crate::scope::ScopeSet;

/// The closed set of supported grant types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    Password,
    ClientCredentials,
    RefreshToken,
}

impl GrantType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "authorization_code" => Some(Self::AuthorizationCode),
            "password" => Some(Self::Password),
            "client_credentials" => Some(Self::ClientCredentials),
            "refresh_token" => Some(Self::RefreshToken),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Password => "password",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
        }
    }
}

/// A registered client, as resolved by the client registry.
///
/// Immutable for the duration of a request. `client_secret_hash` is
/// `None` for public clients; TTL overrides fall back to the provider
/// options when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub client_secret_hash: Option<String>,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<GrantType>,
    pub scopes: ScopeSet,
    pub access_token_ttl: Option<i64>,
    pub refresh_token_ttl: Option<i64>,
}

impl Client {
    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }

    pub fn is_public(&self) -> bool {
        self.client_secret_hash.is_none()
    }
}

/// An authenticated end user, as resolved by the user authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub username: String,
    pub authorities: Vec<String>,
    pub scopes: ScopeSet,
}

/// Parameters of a token-endpoint request, transport-independent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenRequest {
    /// The request as a parameter map, for merging with a stored
    /// authorization request. Credentials are never carried forward.
    pub fn to_params(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();
        params.insert("grant_type".to_string(), self.grant_type.clone());
        let optional = [
            ("code", &self.code),
            ("redirect_uri", &self.redirect_uri),
            ("client_id", &self.client_id),
            ("code_verifier", &self.code_verifier),
            ("username", &self.username),
            ("refresh_token", &self.refresh_token),
            ("scope", &self.scope),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                params.insert(key.to_string(), v.clone());
            }
        }
        params
    }

    pub fn requested_scopes(&self) -> Option<ScopeSet> {
        self.scope.as_deref().map(ScopeSet::parse)
    }
}

/// Parameters of an authorization-endpoint request, validated by the
/// external authorize step before a code is issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub response_type: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
}

/// The request half of a resolved authentication: which client, which
/// scopes, which redirect, and the raw parameters the grant saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizedRequest {
    pub client_id: String,
    pub scopes: ScopeSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// A resolved grant: the final request context plus the principal, when
/// one exists. Produced per request, never persisted (the code store
/// holds the pending form until exchange).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authentication {
    pub request: AuthorizedRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
}

impl Authentication {
    pub fn client_id(&self) -> &str {
        &self.request.client_id
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.request.scopes
    }
}

/// A pending authorization code, owned exclusively by the code store.
#[derive(Debug, Clone)]
pub struct AuthorizationCodeRecord {
    pub code: String,
    pub pkce: Option<PkceChallenge>,
    pub authentication: Authentication,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationCodeRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A minted access token as held by the token store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    pub token: String,
    pub jti: String,
    pub client_id: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub authorities: Vec<String>,
    pub scopes: ScopeSet,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AccessTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A minted refresh token with its own expiry and the scope set fixed
/// at minting time. Renewal may narrow this set, never widen it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub token: String,
    pub client_id: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub authorities: Vec<String>,
    pub scopes: ScopeSet,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Successful token-endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Introspection answer. `active=false` carries no other claims and no
/// reason, whatever made the token invalid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self {
            active: false,
            aud: None,
            user_id: None,
            user_name: None,
            scope: None,
            exp: None,
            authorities: None,
            jti: None,
            client_id: None,
        }
    }
}
