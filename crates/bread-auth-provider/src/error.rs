//! Protocol error taxonomy for the token and introspection endpoints.
//!
//! A flat error-kind enum carried as a value; the transport layer maps it
//! to a status code at the boundary. `InvalidClient` keeps one constant
//! shape whether the client is unknown or its secret is wrong, so callers
//! cannot enumerate registered clients.

use bread_auth_core::CoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    InvalidRequest,
    InvalidGrant,
    InvalidClient,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    RedirectMismatch,
    TemporarilyUnavailable,
    ServerError,
}

impl OAuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidClient => "invalid_client",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::RedirectMismatch => "redirect_uri_mismatch",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::ServerError => "server_error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "The request is missing a required parameter",
            Self::InvalidGrant => "The provided grant is invalid",
            Self::InvalidClient => "Client authentication failed",
            Self::UnauthorizedClient => "The client is not authorized for this grant type",
            Self::UnsupportedGrantType => "The grant type is not supported",
            Self::InvalidScope => "The requested scope is invalid",
            Self::RedirectMismatch => "Redirect URI mismatch",
            Self::TemporarilyUnavailable => "The server is temporarily unavailable",
            Self::ServerError => "The server encountered an unexpected error",
        }
    }

    /// HTTP status the transport layer should answer with.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidClient | Self::UnauthorizedClient => 401,
            Self::TemporarilyUnavailable => 503,
            Self::ServerError => 500,
            _ => 400,
        }
    }

    /// JSON body for the error response.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.code(),
            "error_description": self.description(),
        })
    }
}

impl std::fmt::Display for OAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.description())
    }
}

impl std::error::Error for OAuthError {}

// Infrastructure failures surface as service conditions, never as a
// grant-level rejection.
impl From<CoreError> for OAuthError {
    fn from(err: CoreError) -> Self {
        if err.is_transient() {
            Self::TemporarilyUnavailable
        } else {
            Self::ServerError
        }
    }
}
