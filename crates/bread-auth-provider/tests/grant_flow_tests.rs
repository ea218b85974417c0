//! End-to-end grant flows through the engine: authorize, exchange,
//! renew, introspect.

use std::sync::Arc;

use async_trait::async_trait;
use bread_auth_core::error::{CoreError, Result as CoreResult};
use bread_auth_provider::client::{hash_client_secret, ClientCredentials};
use bread_auth_provider::pkce::{compute_challenge, CodeChallengeMethod};
use bread_auth_provider::registry::{
    ClientRegistry, MemoryClientRegistry, MemoryUserDirectory, UserAuthenticator,
};
use bread_auth_provider::store::{MemoryCodeStore, MemoryTokenStore};
use bread_auth_provider::{
    AuthorizationRequest, Client, GrantEngine, GrantType, IntrospectionService, OAuthError,
    Principal, ProviderOptions, ScopeSet, TokenRequest,
};

const REDIRECT: &str = "https://demo.example.com/callback";

struct Harness {
    engine: GrantEngine,
    introspection: IntrospectionService,
    users: Arc<MemoryUserDirectory>,
}

impl Harness {
    async fn new(options: ProviderOptions) -> Self {
        let clients = Arc::new(MemoryClientRegistry::new());
        clients
            .register(Client {
                client_id: "demo".into(),
                client_secret_hash: Some(hash_client_secret("demo-secret")),
                name: "Demo".into(),
                redirect_uris: vec![REDIRECT.into()],
                grant_types: vec![
                    GrantType::AuthorizationCode,
                    GrantType::Password,
                    GrantType::ClientCredentials,
                    GrantType::RefreshToken,
                ],
                scopes: ScopeSet::parse("read write"),
                access_token_ttl: None,
                refresh_token_ttl: None,
            })
            .await;
        clients
            .register(Client {
                client_id: "other".into(),
                client_secret_hash: Some(hash_client_secret("other-secret")),
                name: "Other".into(),
                redirect_uris: vec!["https://other.example.com/cb".into()],
                grant_types: vec![
                    GrantType::AuthorizationCode,
                    GrantType::RefreshToken,
                    GrantType::ClientCredentials,
                ],
                scopes: ScopeSet::parse("read"),
                access_token_ttl: None,
                refresh_token_ttl: None,
            })
            .await;

        let users = Arc::new(MemoryUserDirectory::new());
        users
            .add_user(
                "alice",
                "alice-pw",
                vec!["user".into()],
                ScopeSet::parse("read write admin"),
            )
            .await;

        let codes = Arc::new(MemoryCodeStore::new(options.authorization_code_ttl));
        let tokens = Arc::new(MemoryTokenStore::new());
        let engine = GrantEngine::new(
            clients.clone(),
            users.clone(),
            codes,
            tokens.clone(),
            options.clone(),
        );
        let introspection = IntrospectionService::new(clients, tokens, options);
        Self {
            engine,
            introspection,
            users,
        }
    }

    async fn alice(&self) -> Principal {
        self.users
            .authenticate("alice", "alice-pw")
            .await
            .unwrap()
            .unwrap()
    }

    fn demo_credentials(&self) -> ClientCredentials {
        ClientCredentials::new("demo", Some("demo-secret".into()))
    }

    async fn issue_code(&self, verifier: &str) -> String {
        let challenge = compute_challenge(verifier, CodeChallengeMethod::S256);
        let request = AuthorizationRequest {
            response_type: "code".into(),
            client_id: "demo".into(),
            redirect_uri: Some(REDIRECT.into()),
            scope: Some("read write".into()),
            state: Some("xyz".into()),
            code_challenge: Some(challenge),
            code_challenge_method: Some("S256".into()),
        };
        self.engine
            .authorize(&request, self.alice().await)
            .await
            .unwrap()
    }

    fn exchange_request(&self, code: &str, verifier: &str) -> TokenRequest {
        TokenRequest {
            grant_type: "authorization_code".into(),
            code: Some(code.into()),
            redirect_uri: Some(REDIRECT.into()),
            code_verifier: Some(verifier.into()),
            ..Default::default()
        }
    }
}

#[tokio::test]
async fn pkce_code_flow_end_to_end() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let code = harness.issue_code("verifier-A").await;

    let response = harness
        .engine
        .token(
            &harness.exchange_request(&code, "verifier-A"),
            Some(harness.demo_credentials()),
        )
        .await
        .unwrap();
    assert_eq!(response.token_type, "bearer");
    assert_eq!(response.scope, "read write");
    assert!(!response.jti.is_empty());
    assert!(response.refresh_token.is_some());

    let claims = harness
        .introspection
        .introspect(&harness.demo_credentials(), &response.access_token)
        .await
        .unwrap();
    assert!(claims.active);
    assert_eq!(claims.user_name.as_deref(), Some("alice"));
    assert_eq!(claims.client_id.as_deref(), Some("demo"));
    assert_eq!(claims.jti.as_deref(), Some(response.jti.as_str()));
    assert_eq!(claims.authorities, Some(vec!["user".to_string()]));
}

#[tokio::test]
async fn code_replay_fails_even_with_correct_verifier() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let code = harness.issue_code("verifier-A").await;
    let request = harness.exchange_request(&code, "verifier-A");

    assert!(harness
        .engine
        .token(&request, Some(harness.demo_credentials()))
        .await
        .is_ok());
    assert_eq!(
        harness
            .engine
            .token(&request, Some(harness.demo_credentials()))
            .await
            .unwrap_err(),
        OAuthError::InvalidGrant
    );
}

#[tokio::test]
async fn wrong_verifier_burns_the_code() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let code = harness.issue_code("verifier-A").await;

    assert_eq!(
        harness
            .engine
            .token(
                &harness.exchange_request(&code, "verifier-B"),
                Some(harness.demo_credentials()),
            )
            .await
            .unwrap_err(),
        OAuthError::InvalidGrant
    );
    // The failed attempt destroyed the code; the right verifier is too late.
    assert_eq!(
        harness
            .engine
            .token(
                &harness.exchange_request(&code, "verifier-A"),
                Some(harness.demo_credentials()),
            )
            .await
            .unwrap_err(),
        OAuthError::InvalidGrant
    );
}

#[tokio::test]
async fn missing_code_is_invalid_request() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let request = TokenRequest {
        grant_type: "authorization_code".into(),
        ..Default::default()
    };
    assert_eq!(
        harness
            .engine
            .token(&request, Some(harness.demo_credentials()))
            .await
            .unwrap_err(),
        OAuthError::InvalidRequest
    );
}

#[tokio::test]
async fn changed_redirect_uri_is_rejected() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let code = harness.issue_code("verifier-A").await;
    let mut request = harness.exchange_request(&code, "verifier-A");
    request.redirect_uri = Some("https://evil.example.com/cb".into());
    assert_eq!(
        harness
            .engine
            .token(&request, Some(harness.demo_credentials()))
            .await
            .unwrap_err(),
        OAuthError::RedirectMismatch
    );
}

#[tokio::test]
async fn omitted_redirect_uri_still_mismatches_stored_one() {
    let harness = Harness::new(ProviderOptions::default()).await;
    // issue_code sends redirect_uri at the authorize step, so the
    // exchange must repeat it.
    let code = harness.issue_code("verifier-A").await;
    let mut request = harness.exchange_request(&code, "verifier-A");
    request.redirect_uri = None;
    assert_eq!(
        harness
            .engine
            .token(&request, Some(harness.demo_credentials()))
            .await
            .unwrap_err(),
        OAuthError::RedirectMismatch
    );
}

#[tokio::test]
async fn redirect_uri_omitted_on_both_legs_uses_sole_registration() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let authorize = AuthorizationRequest {
        response_type: "code".into(),
        client_id: "demo".into(),
        redirect_uri: None,
        scope: Some("read".into()),
        state: None,
        code_challenge: Some(compute_challenge("verifier-A", CodeChallengeMethod::S256)),
        code_challenge_method: Some("S256".into()),
    };
    let code = harness
        .engine
        .authorize(&authorize, harness.alice().await)
        .await
        .unwrap();
    let request = TokenRequest {
        grant_type: "authorization_code".into(),
        code: Some(code),
        code_verifier: Some("verifier-A".into()),
        ..Default::default()
    };
    let response = harness
        .engine
        .token(&request, Some(harness.demo_credentials()))
        .await
        .unwrap();
    assert_eq!(response.scope, "read");
}

#[tokio::test]
async fn redirect_uri_sent_only_at_exchange_must_match_registration() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let authorize = |verifier: &str| AuthorizationRequest {
        response_type: "code".into(),
        client_id: "demo".into(),
        redirect_uri: None,
        scope: Some("read".into()),
        state: None,
        code_challenge: Some(compute_challenge(verifier, CodeChallengeMethod::S256)),
        code_challenge_method: Some("S256".into()),
    };

    let code = harness
        .engine
        .authorize(&authorize("verifier-A"), harness.alice().await)
        .await
        .unwrap();
    let matching = harness.exchange_request(&code, "verifier-A");
    assert!(harness
        .engine
        .token(&matching, Some(harness.demo_credentials()))
        .await
        .is_ok());

    let code = harness
        .engine
        .authorize(&authorize("verifier-B"), harness.alice().await)
        .await
        .unwrap();
    let mut foreign = harness.exchange_request(&code, "verifier-B");
    foreign.redirect_uri = Some("https://evil.example.com/cb".into());
    assert_eq!(
        harness
            .engine
            .token(&foreign, Some(harness.demo_credentials()))
            .await
            .unwrap_err(),
        OAuthError::RedirectMismatch
    );
}

#[tokio::test]
async fn client_id_parameter_must_match_stored_client() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let code = harness.issue_code("verifier-A").await;
    let mut request = harness.exchange_request(&code, "verifier-A");
    request.client_id = Some("other".into());
    assert_eq!(
        harness
            .engine
            .token(&request, Some(harness.demo_credentials()))
            .await
            .unwrap_err(),
        OAuthError::InvalidClient
    );
}

#[tokio::test]
async fn stolen_code_fails_for_a_different_authenticated_client() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let code = harness.issue_code("verifier-A").await;
    let request = harness.exchange_request(&code, "verifier-A");
    assert_eq!(
        harness
            .engine
            .token(
                &request,
                Some(ClientCredentials::new("other", Some("other-secret".into()))),
            )
            .await
            .unwrap_err(),
        OAuthError::InvalidClient
    );
    // And the attempt burned the code for the legitimate client too.
    assert_eq!(
        harness
            .engine
            .token(&request, Some(harness.demo_credentials()))
            .await
            .unwrap_err(),
        OAuthError::InvalidGrant
    );
}

#[tokio::test]
async fn password_grant_issues_tokens() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let request = TokenRequest {
        grant_type: "password".into(),
        username: Some("alice".into()),
        password: Some("alice-pw".into()),
        scope: Some("read".into()),
        ..Default::default()
    };
    let response = harness
        .engine
        .token(&request, Some(harness.demo_credentials()))
        .await
        .unwrap();
    assert_eq!(response.scope, "read");
    assert!(response.refresh_token.is_some());
}

#[tokio::test]
async fn password_grant_scope_exceeding_client_fails() {
    let harness = Harness::new(ProviderOptions::default()).await;
    // Client "demo" is registered with {read, write}; "admin" exceeds it.
    let request = TokenRequest {
        grant_type: "password".into(),
        username: Some("alice".into()),
        password: Some("alice-pw".into()),
        scope: Some("read admin".into()),
        ..Default::default()
    };
    assert_eq!(
        harness
            .engine
            .token(&request, Some(harness.demo_credentials()))
            .await
            .unwrap_err(),
        OAuthError::InvalidScope
    );
}

#[tokio::test]
async fn password_grant_hides_whether_user_exists() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let attempt = |username: &str, password: &str| TokenRequest {
        grant_type: "password".into(),
        username: Some(username.into()),
        password: Some(password.into()),
        ..Default::default()
    };
    let wrong_password = harness
        .engine
        .token(&attempt("alice", "nope"), Some(harness.demo_credentials()))
        .await
        .unwrap_err();
    let unknown_user = harness
        .engine
        .token(&attempt("mallory", "nope"), Some(harness.demo_credentials()))
        .await
        .unwrap_err();
    assert_eq!(wrong_password, OAuthError::InvalidGrant);
    assert_eq!(unknown_user, OAuthError::InvalidGrant);
}

#[tokio::test]
async fn client_credentials_grant_is_principal_free() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let request = TokenRequest {
        grant_type: "client_credentials".into(),
        scope: Some("read".into()),
        ..Default::default()
    };
    let response = harness
        .engine
        .token(&request, Some(harness.demo_credentials()))
        .await
        .unwrap();
    assert!(response.refresh_token.is_none());

    let claims = harness
        .introspection
        .introspect(&harness.demo_credentials(), &response.access_token)
        .await
        .unwrap();
    assert!(claims.active);
    assert!(claims.user_id.is_none());
    assert!(claims.user_name.is_none());
}

#[tokio::test]
async fn refresh_grant_narrows_but_never_widens() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let password = TokenRequest {
        grant_type: "password".into(),
        username: Some("alice".into()),
        password: Some("alice-pw".into()),
        scope: Some("read write".into()),
        ..Default::default()
    };
    let first = harness
        .engine
        .token(&password, Some(harness.demo_credentials()))
        .await
        .unwrap();
    let refresh_token = first.refresh_token.unwrap();

    let widened = TokenRequest {
        grant_type: "refresh_token".into(),
        refresh_token: Some(refresh_token.clone()),
        scope: Some("read write admin".into()),
        ..Default::default()
    };
    assert_eq!(
        harness
            .engine
            .token(&widened, Some(harness.demo_credentials()))
            .await
            .unwrap_err(),
        OAuthError::InvalidScope
    );

    let narrowed = TokenRequest {
        grant_type: "refresh_token".into(),
        refresh_token: Some(refresh_token),
        scope: Some("read".into()),
        ..Default::default()
    };
    let renewed = harness
        .engine
        .token(&narrowed, Some(harness.demo_credentials()))
        .await
        .unwrap();
    assert_eq!(renewed.scope, "read");
    assert!(renewed.refresh_token.is_some());
}

#[tokio::test]
async fn rotated_refresh_token_cannot_be_replayed() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let password = TokenRequest {
        grant_type: "password".into(),
        username: Some("alice".into()),
        password: Some("alice-pw".into()),
        ..Default::default()
    };
    let first = harness
        .engine
        .token(&password, Some(harness.demo_credentials()))
        .await
        .unwrap();
    let old_refresh = first.refresh_token.unwrap();

    let renew = TokenRequest {
        grant_type: "refresh_token".into(),
        refresh_token: Some(old_refresh.clone()),
        ..Default::default()
    };
    let renewed = harness
        .engine
        .token(&renew, Some(harness.demo_credentials()))
        .await
        .unwrap();
    assert_ne!(renewed.refresh_token.as_deref(), Some(old_refresh.as_str()));

    // The replaced token was invalidated with the rotation.
    assert_eq!(
        harness
            .engine
            .token(&renew, Some(harness.demo_credentials()))
            .await
            .unwrap_err(),
        OAuthError::InvalidGrant
    );
}

#[tokio::test]
async fn refresh_token_bound_to_another_client_is_rejected() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let password = TokenRequest {
        grant_type: "password".into(),
        username: Some("alice".into()),
        password: Some("alice-pw".into()),
        ..Default::default()
    };
    let first = harness
        .engine
        .token(&password, Some(harness.demo_credentials()))
        .await
        .unwrap();

    let stolen = TokenRequest {
        grant_type: "refresh_token".into(),
        refresh_token: first.refresh_token,
        ..Default::default()
    };
    assert_eq!(
        harness
            .engine
            .token(
                &stolen,
                Some(ClientCredentials::new("other", Some("other-secret".into()))),
            )
            .await
            .unwrap_err(),
        OAuthError::InvalidClient
    );
}

#[tokio::test]
async fn unknown_client_and_bad_secret_answer_identically() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let request = TokenRequest {
        grant_type: "client_credentials".into(),
        ..Default::default()
    };
    let unknown = harness
        .engine
        .token(
            &request,
            Some(ClientCredentials::new("ghost", Some("whatever".into()))),
        )
        .await
        .unwrap_err();
    let bad_secret = harness
        .engine
        .token(
            &request,
            Some(ClientCredentials::new("demo", Some("wrong".into()))),
        )
        .await
        .unwrap_err();
    assert_eq!(unknown, OAuthError::InvalidClient);
    assert_eq!(bad_secret, OAuthError::InvalidClient);
}

#[tokio::test]
async fn parameter_credentials_resolve_like_out_of_band_ones() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let request = TokenRequest {
        grant_type: "client_credentials".into(),
        client_id: Some("demo".into()),
        client_secret: Some("demo-secret".into()),
        ..Default::default()
    };
    assert!(harness.engine.token(&request, None).await.is_ok());
}

#[tokio::test]
async fn unsupported_grant_type_is_named_rejection() {
    let harness = Harness::new(ProviderOptions::default()).await;
    let request = TokenRequest {
        grant_type: "implicit".into(),
        ..Default::default()
    };
    assert_eq!(
        harness
            .engine
            .token(&request, Some(harness.demo_credentials()))
            .await
            .unwrap_err(),
        OAuthError::UnsupportedGrantType
    );
}

#[tokio::test]
async fn disabled_grant_type_is_unauthorized_client() {
    let harness = Harness::new(ProviderOptions::default()).await;
    // Client "other" has no password grant.
    let request = TokenRequest {
        grant_type: "password".into(),
        username: Some("alice".into()),
        password: Some("alice-pw".into()),
        ..Default::default()
    };
    assert_eq!(
        harness
            .engine
            .token(
                &request,
                Some(ClientCredentials::new("other", Some("other-secret".into()))),
            )
            .await
            .unwrap_err(),
        OAuthError::UnauthorizedClient
    );
}

struct OfflineRegistry;

#[async_trait]
impl ClientRegistry for OfflineRegistry {
    async fn find_client(&self, _client_id: &str) -> CoreResult<Option<Client>> {
        Err(CoreError::Unavailable("client registry timed out".into()))
    }
}

#[tokio::test]
async fn registry_outage_surfaces_as_temporarily_unavailable() {
    let engine = GrantEngine::new(
        Arc::new(OfflineRegistry),
        Arc::new(MemoryUserDirectory::new()),
        Arc::new(MemoryCodeStore::new(600)),
        Arc::new(MemoryTokenStore::new()),
        ProviderOptions::default(),
    );
    let request = TokenRequest {
        grant_type: "client_credentials".into(),
        ..Default::default()
    };
    // An infrastructure outage is never reported as a grant rejection.
    assert_eq!(
        engine
            .token(
                &request,
                Some(ClientCredentials::new("demo", Some("demo-secret".into()))),
            )
            .await
            .unwrap_err(),
        OAuthError::TemporarilyUnavailable
    );
}

#[tokio::test]
async fn preserved_refresh_token_survives_renewal() {
    let harness = Harness::new(ProviderOptions {
        rotate_refresh_tokens: false,
        ..Default::default()
    })
    .await;
    let password = TokenRequest {
        grant_type: "password".into(),
        username: Some("alice".into()),
        password: Some("alice-pw".into()),
        ..Default::default()
    };
    let first = harness
        .engine
        .token(&password, Some(harness.demo_credentials()))
        .await
        .unwrap();
    let refresh_token = first.refresh_token.unwrap();

    let renew = TokenRequest {
        grant_type: "refresh_token".into(),
        refresh_token: Some(refresh_token.clone()),
        ..Default::default()
    };
    let renewed = harness
        .engine
        .token(&renew, Some(harness.demo_credentials()))
        .await
        .unwrap();
    assert_eq!(renewed.refresh_token.as_deref(), Some(refresh_token.as_str()));
    // And it keeps working.
    assert!(harness
        .engine
        .token(&renew, Some(harness.demo_credentials()))
        .await
        .is_ok());
}
