//! # transport-auth
//!
//! Versioned HS256 access tokens. Each subject has one version counter;
//! issuing a token bumps it, which invalidates every earlier token for that
//! subject. [`TokenAuthenticator`] plugs this into the bridge server's
//! [`transport_core::Authenticator`] hook.
//!
//! [`pair`] adds the access/refresh flow: short-lived access tokens that can
//! be revoked individually by `jti`, and one-time refresh tokens that rotate
//! into a fresh pair.

#![deny(unsafe_code)]

pub mod authenticator;
pub mod errors;
pub mod pair;
pub mod store;
pub mod token;

pub use authenticator::TokenAuthenticator;
pub use errors::{AuthError, Result};
pub use pair::{
    AccessClaims, AccessTokenBlocklist, InMemoryBlocklist, InMemoryRefreshStore, PairConfig, RefreshClaims,
    RefreshMetadata, RefreshTokenStore, TokenKind, TokenPair, consume_refresh, issue_pair, refresh_pair,
    revoke_access, verify_access, verify_access_with_version,
};
pub use store::{InMemoryVersionStore, TokenVersionStore};
pub use token::{IssuedToken, TokenClaims, TokenConfig, issue_token, parse_unverified, revoke, verify_token};
