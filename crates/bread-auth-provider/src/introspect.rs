//! Token introspection: "is this token currently valid, and for whom."
//!
//! Caller authentication can fail loudly; the token question never
//! does. Malformed, unknown, and expired tokens all produce the same
//! `active=false` answer so a probing caller learns nothing about why.

use std::sync::Arc;

use crate::client::{authenticate_client, ClientCredentials};
use crate::config::ProviderOptions;
use crate::error::OAuthError;
use crate::registry::ClientRegistry;
use crate::store::TokenStore;
use crate::types::{AccessTokenRecord, IntrospectionResponse};

pub struct IntrospectionService {
    clients: Arc<dyn ClientRegistry>,
    tokens: Arc<dyn TokenStore>,
    options: ProviderOptions,
}

impl IntrospectionService {
    pub fn new(
        clients: Arc<dyn ClientRegistry>,
        tokens: Arc<dyn TokenStore>,
        options: ProviderOptions,
    ) -> Self {
        Self {
            clients,
            tokens,
            options,
        }
    }

    /// Introspect a presented token string on behalf of an
    /// authenticated client.
    ///
    /// Errors concern the caller only: unknown client, bad secret, or a
    /// client not permitted to introspect. Once the caller is accepted,
    /// the result is always `Ok` — inactive tokens included.
    pub async fn introspect(
        &self,
        credentials: &ClientCredentials,
        token: &str,
    ) -> Result<IntrospectionResponse, OAuthError> {
        let caller = self
            .clients
            .find_client(&credentials.client_id)
            .await?
            .ok_or(OAuthError::InvalidClient)?;
        authenticate_client(&caller, credentials.client_secret.as_deref())?;
        if let Some(ref required) = self.options.introspection_scope {
            if !caller.scopes.contains(required) {
                return Err(OAuthError::UnauthorizedClient);
            }
        }

        match self.tokens.find_access_token(token).await? {
            Some(record) => Ok(self.active_response(&record)),
            None => Ok(IntrospectionResponse::inactive()),
        }
    }

    fn active_response(&self, record: &AccessTokenRecord) -> IntrospectionResponse {
        IntrospectionResponse {
            active: true,
            aud: Some(self.options.resource_ids.clone()),
            user_id: record.user_id.clone(),
            user_name: record.user_name.clone(),
            scope: Some(record.scopes.to_vec()),
            exp: Some(record.expires_at.timestamp()),
            authorities: Some(record.authorities.clone()),
            jti: Some(record.jti.clone()),
            client_id: Some(record.client_id.clone()),
        }
    }
}
