//! Client credentials: secret hashing, verification, and the two
//! presentation forms the token endpoint accepts.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::OAuthError;
use crate::scope::ScopeSet;
use crate::types::{Client, GrantType, TokenRequest};

/// Client credentials as presented to the token or introspection
/// endpoint: either resolved out-of-band (basic-auth equivalent) or
/// lifted from the `client_id`/`client_secret` request parameters.
/// Both forms resolve through the same registry lookup.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
        }
    }

    /// Credentials from request parameters, when the client sent them
    /// in-band.
    pub fn from_request(request: &TokenRequest) -> Option<Self> {
        request.client_id.as_ref().map(|id| Self {
            client_id: id.clone(),
            client_secret: request.client_secret.clone(),
        })
    }
}

/// Hash a client secret for storage.
pub fn hash_client_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of a presented secret against its stored hash.
pub fn verify_client_secret(secret: &str, hash: &str) -> bool {
    let computed = hash_client_secret(secret);
    computed.as_bytes().ct_eq(hash.as_bytes()).into()
}

/// Verify a client's presented secret.
///
/// The answer is the same `InvalidClient` whether the secret is absent,
/// wrong, or the client record has no hash to check against.
pub fn authenticate_client(client: &Client, presented: Option<&str>) -> Result<(), OAuthError> {
    match &client.client_secret_hash {
        // Public client: nothing to verify.
        None => Ok(()),
        Some(hash) => {
            let secret = presented.ok_or(OAuthError::InvalidClient)?;
            if verify_client_secret(secret, hash) {
                Ok(())
            } else {
                Err(OAuthError::InvalidClient)
            }
        }
    }
}

/// Redirect URIs must be https (localhost excepted) and fragment-free.
/// Enforced at registration time, before a URI ever reaches the grant
/// engine's byte-equality check.
pub fn validate_redirect_uri(uri: &str) -> Result<(), OAuthError> {
    let parsed = url::Url::parse(uri).map_err(|_| OAuthError::InvalidRequest)?;
    if parsed.scheme() != "https"
        && parsed.host_str() != Some("localhost")
        && parsed.host_str() != Some("127.0.0.1")
    {
        return Err(OAuthError::InvalidRequest);
    }
    if parsed.fragment().is_some() {
        return Err(OAuthError::InvalidRequest);
    }
    Ok(())
}

/// Build a registered client. For confidential clients the plaintext
/// secret is returned exactly once, alongside the record holding its hash.
pub fn build_client(
    name: &str,
    redirect_uris: Vec<String>,
    grant_types: Vec<GrantType>,
    scopes: ScopeSet,
    confidential: bool,
) -> Result<(Client, Option<String>), OAuthError> {
    for uri in &redirect_uris {
        validate_redirect_uri(uri)?;
    }
    let client_id = bread_auth_core::id::generate_id();
    let secret = if confidential {
        Some(URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>()))
    } else {
        None
    };
    let client = Client {
        client_id,
        client_secret_hash: secret.as_deref().map(hash_client_secret),
        name: name.to_string(),
        redirect_uris,
        grant_types,
        scopes,
        access_token_ttl: None,
        refresh_token_ttl: None,
    };
    Ok((client, secret))
}
