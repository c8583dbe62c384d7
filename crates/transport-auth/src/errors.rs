//! Auth error types.

use thiserror::Error;

use crate::pair::TokenKind;

/// Errors raised while issuing or verifying tokens.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No signing secret configured.
    #[error("jwt secret is empty")]
    EmptySecret,
    /// Signature, expiry, or format check failed.
    #[error("invalid token: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    /// The token was issued under an older version (re-login or revoke).
    #[error("token invalidated: version {presented} != current {current}")]
    VersionMismatch {
        /// Version embedded in the token.
        presented: u64,
        /// Version held by the store.
        current: u64,
    },
    /// The lifetime does not fit in a timestamp.
    #[error("token ttl out of range: {0:?}")]
    InvalidTtl(std::time::Duration),
    /// The version store failed.
    #[error("token version store: {0}")]
    Store(String),
    /// An access token was presented where a refresh token was expected, or
    /// the reverse.
    #[error("invalid token type: expected {expected}, got {found}")]
    WrongTokenType {
        /// Kind the operation accepts.
        expected: TokenKind,
        /// Kind carried by the token.
        found: TokenKind,
    },
    /// The token carries no `jti`.
    #[error("token has no jti")]
    MissingJti,
    /// The access token's `jti` is on the blocklist.
    #[error("token revoked")]
    Revoked,
    /// The refresh token was already used, expired, or never stored.
    #[error("refresh token not found")]
    RefreshNotFound,
    /// The stored refresh metadata disagrees with the token's claims.
    #[error("refresh token {0} mismatch")]
    RefreshMismatch(&'static str),
}

/// Result type for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;
