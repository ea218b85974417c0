//! # bread-auth-provider
//!
//! The grant-issuance core of an OAuth2 authorization server: it turns a
//! proven end-user or client identity into bearer credentials, enforcing
//! the protocol invariants for four grant types plus introspection.
//!
//! - Authorization code grant with PKCE (single-use codes, atomic
//!   consume, S256/plain verifier checks)
//! - Resource-owner password grant
//! - Client credentials grant (principal-free)
//! - Refresh-token renewal (narrowing only, rotation policy)
//! - Token introspection (RFC 7662 shape, `active=false` over errors)
//!
//! HTTP routing, persistent client/user storage, and the approval UI are
//! external collaborators behind the [`registry`] and [`store`] traits.

pub mod client;
pub mod config;
pub mod error;
pub mod grants;
pub mod introspect;
pub mod pkce;
pub mod registry;
pub mod scope;
pub mod store;
pub mod token;
pub mod types;

pub use config::ProviderOptions;
pub use error::OAuthError;
pub use grants::GrantEngine;
pub use introspect::IntrospectionService;
pub use scope::ScopeSet;
pub use token::TokenIssuer;
pub use types::*;
