//! Bridge stream authenticator backed by versioned tokens.

use std::sync::Arc;

use async_trait::async_trait;
use transport_core::hooks::{AuthRejection, Authenticator, Principal, StreamMetadata, bearer_token};

use crate::errors::AuthError;
use crate::store::TokenVersionStore;
use crate::token::{TokenConfig, verify_token};

/// Admits streams presenting a valid `authorization: Bearer` token.
pub struct TokenAuthenticator {
    config: TokenConfig,
    store: Arc<dyn TokenVersionStore>,
}

impl TokenAuthenticator {
    /// Verify tokens signed with `config` against `store`.
    pub fn new(config: TokenConfig, store: Arc<dyn TokenVersionStore>) -> Self {
        Self { config, store }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, metadata: &StreamMetadata) -> Result<Principal, AuthRejection> {
        let token = bearer_token(metadata)
            .ok_or_else(|| AuthRejection::unauthorized("missing bearer token"))?;

        match verify_token(&self.config, self.store.as_ref(), token).await {
            Ok(claims) => Ok(Principal {
                subject: claims.uid,
                version: claims.ver,
            }),
            Err(e @ (AuthError::Store(_) | AuthError::EmptySecret)) => {
                tracing::error!(error = %e, "token verification unavailable");
                Err(AuthRejection::internal(e.to_string()))
            }
            Err(e) => Err(AuthRejection::unauthorized(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryVersionStore;
    use crate::token::issue_token;
    use std::collections::HashMap;
    use transport_core::codes;
    use transport_core::hooks::AUTHORIZATION_HEADER;

    fn metadata(token: &str) -> StreamMetadata {
        HashMap::from([(AUTHORIZATION_HEADER.to_owned(), format!("Bearer {token}"))])
    }

    #[tokio::test]
    async fn admits_valid_token() {
        let store = Arc::new(InMemoryVersionStore::new());
        let config = TokenConfig::new("k");
        let issued = issue_token(&config, store.as_ref(), "node-7", "").await.unwrap();

        let auth = TokenAuthenticator::new(config, store);
        let principal = auth.authenticate(&metadata(&issued.token)).await.unwrap();
        assert_eq!(principal.subject, "node-7");
        assert_eq!(principal.version, 1);
    }

    #[tokio::test]
    async fn rejects_missing_and_bad_tokens() {
        let auth = TokenAuthenticator::new(
            TokenConfig::new("k"),
            Arc::new(InMemoryVersionStore::new()),
        );
        let err = auth.authenticate(&StreamMetadata::new()).await.unwrap_err();
        assert_eq!(err.code, codes::UNAUTHORIZED);

        let err = auth.authenticate(&metadata("not-a-jwt")).await.unwrap_err();
        assert_eq!(err.code, codes::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_secret_is_internal() {
        let auth = TokenAuthenticator::new(
            TokenConfig::new(""),
            Arc::new(InMemoryVersionStore::new()),
        );
        let err = auth.authenticate(&metadata("a.b.c")).await.unwrap_err();
        assert_eq!(err.code, codes::INTERNAL);
    }
}
