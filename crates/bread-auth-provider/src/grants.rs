//! Grant engine: one strategy per grant type, selected by the
//! `grant_type` field, each resolving a token request into an
//! `Authentication` or a protocol error.
//!
//! Shared preconditions run before any strategy: the client is resolved
//! and its secret verified (parameter pair or out-of-band credentials,
//! one registry lookup either way), and the grant type must be enabled
//! for the client. Every rejection is terminal; nothing is retried.

use std::collections::HashMap;
use std::sync::Arc;

use bread_auth_core::AuthLogger;

use crate::client::{authenticate_client, ClientCredentials};
use crate::config::ProviderOptions;
use crate::error::OAuthError;
use crate::pkce::{CodeChallengeMethod, PkceChallenge};
use crate::registry::{ClientRegistry, UserAuthenticator};
use crate::scope::ScopeSet;
use crate::store::{AuthorizationCodeStore, TokenStore};
use crate::token::TokenIssuer;
use crate::types::{
    Authentication, AuthorizationRequest, AuthorizedRequest, Client, GrantType, Principal,
    RefreshTokenRecord, TokenRequest, TokenResponse,
};

/// The grant-issuance core: consults the client registry, user
/// authenticator, and code store, then hands the resolved
/// authentication to the token issuer.
pub struct GrantEngine {
    clients: Arc<dyn ClientRegistry>,
    users: Arc<dyn UserAuthenticator>,
    codes: Arc<dyn AuthorizationCodeStore>,
    tokens: Arc<dyn TokenStore>,
    issuer: TokenIssuer,
    options: ProviderOptions,
    logger: AuthLogger,
}

impl GrantEngine {
    pub fn new(
        clients: Arc<dyn ClientRegistry>,
        users: Arc<dyn UserAuthenticator>,
        codes: Arc<dyn AuthorizationCodeStore>,
        tokens: Arc<dyn TokenStore>,
        options: ProviderOptions,
    ) -> Self {
        Self {
            clients,
            users,
            codes,
            issuer: TokenIssuer::new(tokens.clone(), options.clone()),
            tokens,
            options,
            logger: AuthLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: AuthLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Handle a token-endpoint request.
    ///
    /// `presented` carries credentials resolved out-of-band (basic-auth
    /// equivalent); when absent, the `client_id`/`client_secret`
    /// request parameters are used instead.
    pub async fn token(
        &self,
        request: &TokenRequest,
        presented: Option<ClientCredentials>,
    ) -> Result<TokenResponse, OAuthError> {
        let credentials = presented
            .or_else(|| ClientCredentials::from_request(request))
            .ok_or(OAuthError::InvalidClient)?;
        let client = self
            .clients
            .find_client(&credentials.client_id)
            .await?
            .ok_or(OAuthError::InvalidClient)?;
        authenticate_client(&client, credentials.client_secret.as_deref())?;

        let grant =
            GrantType::parse(&request.grant_type).ok_or(OAuthError::UnsupportedGrantType)?;
        if !client.allows_grant(grant) {
            self.logger.warn(&format!(
                "client {} is not permitted the {} grant",
                client.client_id,
                grant.as_str()
            ));
            return Err(OAuthError::UnauthorizedClient);
        }

        let (authentication, replaced) = match grant {
            GrantType::AuthorizationCode => {
                (self.authorization_code_grant(request, &client).await?, None)
            }
            GrantType::Password => (self.password_grant(request, &client).await?, None),
            GrantType::ClientCredentials => {
                (self.client_credentials_grant(request, &client)?, None)
            }
            GrantType::RefreshToken => {
                let (authentication, record) =
                    self.refresh_token_grant(request, &client).await?;
                (authentication, Some(record))
            }
        };

        let response = self
            .issuer
            .issue(&authentication, &client, grant, replaced.as_ref())
            .await?;
        self.logger.info(&format!(
            "issued {} tokens for client {} (jti {})",
            grant.as_str(),
            client.client_id,
            response.jti
        ));
        Ok(response)
    }

    /// Authorization-code-with-PKCE strategy.
    ///
    /// The code is consumed (and destroyed) before any cross-check, so
    /// a request failing the redirect or client check still burns the
    /// code.
    async fn authorization_code_grant(
        &self,
        request: &TokenRequest,
        client: &Client,
    ) -> Result<Authentication, OAuthError> {
        let code = request.code.as_deref().ok_or(OAuthError::InvalidRequest)?;
        let verifier = request.code_verifier.as_deref().unwrap_or("");
        let stored = self
            .codes
            .consume_and_verify(code, verifier)
            .await?
            .ok_or(OAuthError::InvalidGrant)?;

        // The redirect check runs only when either request carried a
        // redirect_uri. The stored record always holds the resolved URI;
        // whether the authorization request actually sent one is read
        // from its parameter map.
        let stored_redirect = stored.request.redirect_uri.clone();
        let redirect_was_sent = stored.request.params.contains_key("redirect_uri");
        if (request.redirect_uri.is_some() || redirect_was_sent)
            && request.redirect_uri != stored_redirect
        {
            return Err(OAuthError::RedirectMismatch);
        }

        // Both the client_id parameter (when sent) and the authenticated
        // client must match the client the code was issued to.
        if let Some(ref client_id) = request.client_id {
            if client_id != stored.client_id() {
                return Err(OAuthError::InvalidClient);
            }
        }
        if client.client_id != stored.client_id() {
            return Err(OAuthError::InvalidClient);
        }

        // Merge original and token-request parameters; token-request
        // values win on conflict.
        let mut params: HashMap<String, String> = stored.request.params.clone();
        params.extend(request.to_params());

        Ok(Authentication {
            request: AuthorizedRequest {
                client_id: stored.request.client_id.clone(),
                scopes: stored.request.scopes.clone(),
                redirect_uri: stored_redirect,
                params,
            },
            principal: stored.principal,
        })
    }

    /// Resource-owner password strategy.
    async fn password_grant(
        &self,
        request: &TokenRequest,
        client: &Client,
    ) -> Result<Authentication, OAuthError> {
        let username = request.username.as_deref().ok_or(OAuthError::InvalidRequest)?;
        let password = request.password.as_deref().ok_or(OAuthError::InvalidRequest)?;
        // One answer for unknown user and wrong password alike.
        let principal = self
            .users
            .authenticate(username, password)
            .await?
            .ok_or(OAuthError::InvalidGrant)?;

        let scopes = match request.requested_scopes() {
            Some(requested) => {
                if !requested.is_subset(&client.scopes) || !requested.is_subset(&principal.scopes)
                {
                    return Err(OAuthError::InvalidScope);
                }
                requested
            }
            None => client.scopes.intersection(&principal.scopes),
        };

        Ok(Authentication {
            request: AuthorizedRequest {
                client_id: client.client_id.clone(),
                scopes,
                redirect_uri: None,
                params: request.to_params(),
            },
            principal: Some(principal),
        })
    }

    /// Client-credentials strategy: no principal, ever.
    fn client_credentials_grant(
        &self,
        request: &TokenRequest,
        client: &Client,
    ) -> Result<Authentication, OAuthError> {
        let scopes = match request.requested_scopes() {
            Some(requested) => {
                if !requested.is_subset(&client.scopes) {
                    return Err(OAuthError::InvalidScope);
                }
                requested
            }
            None => client.scopes.clone(),
        };
        Ok(Authentication {
            request: AuthorizedRequest {
                client_id: client.client_id.clone(),
                scopes,
                redirect_uri: None,
                params: request.to_params(),
            },
            principal: None,
        })
    }

    /// Refresh-token strategy: narrowing allowed, widening forbidden.
    async fn refresh_token_grant(
        &self,
        request: &TokenRequest,
        client: &Client,
    ) -> Result<(Authentication, RefreshTokenRecord), OAuthError> {
        let token = request
            .refresh_token
            .as_deref()
            .ok_or(OAuthError::InvalidRequest)?;
        let record = self
            .tokens
            .find_refresh_token(token)
            .await?
            .ok_or(OAuthError::InvalidGrant)?;
        if record.client_id != client.client_id {
            return Err(OAuthError::InvalidClient);
        }

        let scopes = match request.requested_scopes() {
            Some(requested) => {
                if !requested.is_subset(&record.scopes) {
                    return Err(OAuthError::InvalidScope);
                }
                requested
            }
            None => record.scopes.clone(),
        };

        let principal = record.user_id.clone().map(|user_id| Principal {
            user_id,
            username: record.user_name.clone().unwrap_or_default(),
            authorities: record.authorities.clone(),
            scopes: record.scopes.clone(),
        });

        let authentication = Authentication {
            request: AuthorizedRequest {
                client_id: client.client_id.clone(),
                scopes,
                redirect_uri: None,
                params: request.to_params(),
            },
            principal,
        };
        Ok((authentication, record))
    }

    /// Approve an authorization request and mint a single-use code.
    ///
    /// The approval UI and user session live outside this core; the
    /// caller hands in the already-authenticated principal.
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
        principal: Principal,
    ) -> Result<String, OAuthError> {
        let client = self
            .clients
            .find_client(&request.client_id)
            .await?
            .ok_or(OAuthError::InvalidClient)?;
        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(OAuthError::UnauthorizedClient);
        }
        validate_authorization_request(request, &client, &self.options)?;
        let redirect_uri = resolve_redirect_uri(request, &client)?;

        let scopes = match request.scope.as_deref().map(ScopeSet::parse) {
            Some(requested) => {
                if !requested.is_subset(&client.scopes) {
                    return Err(OAuthError::InvalidScope);
                }
                requested
            }
            None => client.scopes.clone(),
        };

        let pkce = match &request.code_challenge {
            Some(challenge) => {
                let method = match request.code_challenge_method.as_deref() {
                    Some(raw) => {
                        CodeChallengeMethod::parse(raw).ok_or(OAuthError::InvalidRequest)?
                    }
                    None => CodeChallengeMethod::S256,
                };
                Some(PkceChallenge::new(challenge.clone(), method))
            }
            None => None,
        };

        let mut params = HashMap::new();
        params.insert("response_type".to_string(), request.response_type.clone());
        params.insert("client_id".to_string(), request.client_id.clone());
        // Recorded only when the request carried one; a defaulted sole
        // registration must not arm the exchange-time redirect check.
        if request.redirect_uri.is_some() {
            params.insert("redirect_uri".to_string(), redirect_uri.clone());
        }
        if let Some(ref scope) = request.scope {
            params.insert("scope".to_string(), scope.clone());
        }
        if let Some(ref state) = request.state {
            params.insert("state".to_string(), state.clone());
        }

        let pending = Authentication {
            request: AuthorizedRequest {
                client_id: client.client_id.clone(),
                scopes,
                redirect_uri: Some(redirect_uri),
                params,
            },
            principal: Some(principal),
        };
        let code = self.codes.issue(pending, pkce).await?;
        self.logger.debug(&format!(
            "issued authorization code for client {}",
            client.client_id
        ));
        Ok(code)
    }
}

/// Validate an authorization request against the client record before
/// approval.
pub fn validate_authorization_request(
    request: &AuthorizationRequest,
    client: &Client,
    options: &ProviderOptions,
) -> Result<(), OAuthError> {
    if request.response_type != "code" {
        return Err(OAuthError::InvalidRequest);
    }
    if let Some(ref uri) = request.redirect_uri {
        if !client.redirect_uris.iter().any(|u| u == uri) {
            return Err(OAuthError::RedirectMismatch);
        }
    } else if client.redirect_uris.len() != 1 {
        return Err(OAuthError::InvalidRequest);
    }
    if client.is_public() && options.require_pkce && request.code_challenge.is_none() {
        return Err(OAuthError::InvalidRequest);
    }
    Ok(())
}

/// The effective redirect URI: the requested one when registered, or
/// the sole registered URI when the request leaves it out.
pub fn resolve_redirect_uri(
    request: &AuthorizationRequest,
    client: &Client,
) -> Result<String, OAuthError> {
    match request.redirect_uri {
        Some(ref uri) if client.redirect_uris.iter().any(|u| u == uri) => Ok(uri.clone()),
        Some(_) => Err(OAuthError::RedirectMismatch),
        None if client.redirect_uris.len() == 1 => Ok(client.redirect_uris[0].clone()),
        None => Err(OAuthError::InvalidRequest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::hash_client_secret;

    fn client(public: bool) -> Client {
        Client {
            client_id: "demo".into(),
            client_secret_hash: (!public).then(|| hash_client_secret("secret")),
            name: "Demo".into(),
            redirect_uris: vec!["https://app.example.com/callback".into()],
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            scopes: ScopeSet::parse("read write"),
            access_token_ttl: None,
            refresh_token_ttl: None,
        }
    }

    fn authz_request(redirect: Option<&str>, challenge: Option<&str>) -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: "code".into(),
            client_id: "demo".into(),
            redirect_uri: redirect.map(String::from),
            scope: Some("read".into()),
            state: Some("xyz".into()),
            code_challenge: challenge.map(String::from),
            code_challenge_method: challenge.map(|_| "S256".into()),
        }
    }

    #[test]
    fn test_validate_authorization_request() {
        let client = client(false);
        let options = ProviderOptions::default();
        let request = authz_request(Some("https://app.example.com/callback"), Some("c"));
        assert!(validate_authorization_request(&request, &client, &options).is_ok());
    }

    #[test]
    fn test_unregistered_redirect_rejected() {
        let client = client(false);
        let options = ProviderOptions::default();
        let request = authz_request(Some("https://evil.example.com/cb"), Some("c"));
        assert_eq!(
            validate_authorization_request(&request, &client, &options).unwrap_err(),
            OAuthError::RedirectMismatch
        );
    }

    #[test]
    fn test_wrong_response_type_rejected() {
        let client = client(false);
        let options = ProviderOptions::default();
        let mut request = authz_request(Some("https://app.example.com/callback"), Some("c"));
        request.response_type = "token".into();
        assert_eq!(
            validate_authorization_request(&request, &client, &options).unwrap_err(),
            OAuthError::InvalidRequest
        );
    }

    #[test]
    fn test_public_client_requires_challenge() {
        let client = client(true);
        let options = ProviderOptions::default();
        let request = authz_request(Some("https://app.example.com/callback"), None);
        assert_eq!(
            validate_authorization_request(&request, &client, &options).unwrap_err(),
            OAuthError::InvalidRequest
        );
    }

    #[test]
    fn test_resolve_redirect_uri_defaults_to_sole_registration() {
        let client = client(false);
        let request = authz_request(None, Some("c"));
        assert_eq!(
            resolve_redirect_uri(&request, &client).unwrap(),
            "https://app.example.com/callback"
        );
    }
}
