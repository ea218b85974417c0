//! Token issuance: turning a resolved authentication into bearer
//! credentials.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::config::ProviderOptions;
use crate::error::OAuthError;
use crate::store::{generate_token_value, TokenStore};
use crate::types::{
    AccessTokenRecord, Authentication, Client, GrantType, RefreshTokenRecord, TokenResponse,
};

/// Mints access and refresh tokens and persists them to the token store
/// so introspection can resolve the opaque values later.
#[derive(Clone)]
pub struct TokenIssuer {
    tokens: Arc<dyn TokenStore>,
    options: ProviderOptions,
}

impl TokenIssuer {
    pub fn new(tokens: Arc<dyn TokenStore>, options: ProviderOptions) -> Self {
        Self { tokens, options }
    }

    /// Issue tokens for a resolved authentication.
    ///
    /// A refresh token is issued for every grant type except
    /// client_credentials, and only when the client is permitted the
    /// refresh grant. On the refresh grant itself, `replaced` is the
    /// record being renewed: with rotation on it is atomically
    /// invalidated and replaced; with rotation off its value is
    /// preserved and returned again.
    pub async fn issue(
        &self,
        authentication: &Authentication,
        client: &Client,
        grant: GrantType,
        replaced: Option<&RefreshTokenRecord>,
    ) -> Result<TokenResponse, OAuthError> {
        let scopes = authentication.scopes();
        // Scope invariant holds at issuance whatever path produced the
        // authentication, including codes stored before a client's
        // allowed scopes were narrowed.
        if !scopes.is_subset(&client.scopes) {
            return Err(OAuthError::InvalidScope);
        }

        let now = Utc::now();
        let jti = Uuid::new_v4().to_string();
        let access_ttl = client
            .access_token_ttl
            .unwrap_or(self.options.access_token_ttl);
        let principal = authentication.principal.as_ref();

        let access = AccessTokenRecord {
            token: generate_token_value(),
            jti: jti.clone(),
            client_id: client.client_id.clone(),
            user_id: principal.map(|p| p.user_id.clone()),
            user_name: principal.map(|p| p.username.clone()),
            authorities: principal.map(|p| p.authorities.clone()).unwrap_or_default(),
            scopes: scopes.clone(),
            expires_at: now + Duration::seconds(access_ttl),
            created_at: now,
        };
        self.tokens.save_access_token(access.clone()).await?;

        let refresh_token =
            if grant != GrantType::ClientCredentials && client.allows_grant(GrantType::RefreshToken)
            {
                self.issue_refresh_token(&access, client, grant, replaced)
                    .await?
            } else {
                None
            };

        Ok(TokenResponse {
            access_token: access.token,
            token_type: "bearer".to_string(),
            expires_in: access_ttl,
            scope: scopes.to_string(),
            jti,
            refresh_token,
        })
    }

    async fn issue_refresh_token(
        &self,
        access: &AccessTokenRecord,
        client: &Client,
        grant: GrantType,
        replaced: Option<&RefreshTokenRecord>,
    ) -> Result<Option<String>, OAuthError> {
        if grant == GrantType::RefreshToken && !self.options.rotate_refresh_tokens {
            // Preservation policy: hand the presented token back untouched.
            return Ok(replaced.map(|r| r.token.clone()));
        }

        let now = Utc::now();
        let refresh_ttl = client
            .refresh_token_ttl
            .unwrap_or(self.options.refresh_token_ttl);
        // A rotated token keeps the scope set of the grant it renews, so
        // a narrowed access token does not shrink what later renewals
        // may request.
        let scopes = match replaced {
            Some(old) if grant == GrantType::RefreshToken => old.scopes.clone(),
            _ => access.scopes.clone(),
        };
        let record = RefreshTokenRecord {
            token: generate_token_value(),
            client_id: client.client_id.clone(),
            user_id: access.user_id.clone(),
            user_name: access.user_name.clone(),
            authorities: access.authorities.clone(),
            scopes,
            expires_at: now + Duration::seconds(refresh_ttl),
            created_at: now,
        };
        let value = record.token.clone();
        match replaced {
            // Rotation: the replaced token must die with the swap.
            Some(old) => self.tokens.replace_refresh_token(&old.token, record).await?,
            None => self.tokens.save_refresh_token(record).await?,
        }
        Ok(Some(value))
    }
}
