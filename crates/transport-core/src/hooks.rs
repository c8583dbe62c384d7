//! Collaborator hooks consumed by the bridge.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::codes::{self, ErrorCode};

/// Out-of-band stream metadata (upgrade request headers).
///
/// Keys are lowercase header names.
pub type StreamMetadata = HashMap<String, String>;

/// Header carrying the bearer token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Identity established by an [`Authenticator`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Principal {
    /// Authenticated subject (user or node id).
    pub subject: String,
    /// Token version the credential was issued under.
    pub version: u64,
}

/// Why a stream was refused.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{code}: {reason}")]
pub struct AuthRejection {
    /// Structured code reported to the peer.
    pub code: ErrorCode,
    /// Detail for logs.
    pub reason: String,
}

impl AuthRejection {
    /// An [`codes::UNAUTHORIZED`] rejection.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self {
            code: codes::UNAUTHORIZED,
            reason: reason.into(),
        }
    }

    /// An [`codes::INTERNAL`] rejection, for store or backend failures.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self {
            code: codes::INTERNAL,
            reason: reason.into(),
        }
    }
}

/// Verifies a stream before it is accepted.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Inspect the stream metadata and either admit or reject the peer.
    async fn authenticate(&self, metadata: &StreamMetadata) -> Result<Principal, AuthRejection>;
}

/// Extract the token from an `authorization: Bearer <token>` entry.
pub fn bearer_token(metadata: &StreamMetadata) -> Option<&str> {
    let value = metadata.get(AUTHORIZATION_HEADER)?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
