//! Issue, verify, and revoke versioned HS256 access tokens.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AuthError, Result};
use crate::store::TokenVersionStore;

/// Token lifetime used when [`TokenConfig::ttl`] is zero.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Signing configuration.
#[derive(Clone, Debug)]
pub struct TokenConfig {
    /// HS256 shared secret.
    pub secret: String,
    /// Token lifetime; zero means [`DEFAULT_TTL`].
    pub ttl: Duration,
    /// Leeway applied to the expiry check.
    pub clock_skew: Duration,
}

impl TokenConfig {
    /// Config with the default lifetime and no skew.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttl: DEFAULT_TTL,
            clock_skew: Duration::ZERO,
        }
    }

    fn effective_ttl(&self) -> Duration {
        if self.ttl.is_zero() { DEFAULT_TTL } else { self.ttl }
    }

    fn check_secret(&self) -> Result<()> {
        if self.secret.is_empty() {
            return Err(AuthError::EmptySecret);
        }
        Ok(())
    }
}

/// Claims carried by an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user or node) id.
    pub uid: String,
    /// Caller-defined login sequence.
    #[serde(default)]
    pub seq: String,
    /// Version the token was issued under.
    pub ver: u64,
    /// Registered subject claim.
    pub sub: String,
    /// Unique token id.
    pub jti: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

/// A freshly issued token.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    /// Encoded JWT.
    pub token: String,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
    /// Lifetime in seconds.
    pub expires_in: u64,
    /// Version the token carries.
    pub version: u64,
}

/// `now + ttl`, or [`AuthError::InvalidTtl`] if it overflows.
pub(crate) fn expires_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .ok_or(AuthError::InvalidTtl(ttl))
}

/// Issue a token for `subject`, invalidating all earlier ones.
pub async fn issue_token(
    config: &TokenConfig,
    store: &dyn TokenVersionStore,
    subject: &str,
    sequence: &str,
) -> Result<IssuedToken> {
    config.check_secret()?;
    let version = store.incr_version(subject).await?;

    let ttl = config.effective_ttl();
    let now = Utc::now();
    let expires_at = expires_after(now, ttl)?;

    let claims = TokenClaims {
        uid: subject.to_owned(),
        seq: sequence.to_owned(),
        ver: version,
        sub: subject.to_owned(),
        jti: uuid::Uuid::new_v4().to_string(),
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
    };
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?;

    debug!(subject, version, "issued access token");
    Ok(IssuedToken {
        token,
        expires_at,
        expires_in: ttl.as_secs(),
        version,
    })
}

/// Verify signature, expiry, and that the version is still current.
pub async fn verify_token(
    config: &TokenConfig,
    store: &dyn TokenVersionStore,
    token: &str,
) -> Result<TokenClaims> {
    config.check_secret()?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = config.clock_skew.as_secs();
    validation.validate_aud = false;
    let data = jsonwebtoken::decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )?;
    let claims = data.claims;

    let current = store.get_version(&claims.uid).await?;
    if claims.ver != current {
        return Err(AuthError::VersionMismatch {
            presented: claims.ver,
            current,
        });
    }
    Ok(claims)
}

/// Invalidate every outstanding token for `subject`.
pub async fn revoke(store: &dyn TokenVersionStore, subject: &str) -> Result<()> {
    let _ = store.incr_version(subject).await?;
    Ok(())
}

/// Decode claims without checking signature or expiry. For diagnostics only.
pub fn parse_unverified(token: &str) -> Result<TokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    let data = jsonwebtoken::decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryVersionStore;
    use assert_matches::assert_matches;

    fn config() -> TokenConfig {
        TokenConfig::new("test-secret")
    }

    #[tokio::test]
    async fn issue_then_verify() {
        let store = InMemoryVersionStore::new();
        let issued = issue_token(&config(), &store, "node-1", "s1").await.unwrap();
        assert_eq!(issued.version, 1);
        assert_eq!(issued.expires_in, DEFAULT_TTL.as_secs());

        let claims = verify_token(&config(), &store, &issued.token).await.unwrap();
        assert_eq!(claims.uid, "node-1");
        assert_eq!(claims.sub, "node-1");
        assert_eq!(claims.seq, "s1");
        assert_eq!(claims.ver, 1);
    }

    #[tokio::test]
    async fn reissue_invalidates_previous() {
        let store = InMemoryVersionStore::new();
        let first = issue_token(&config(), &store, "u", "").await.unwrap();
        let second = issue_token(&config(), &store, "u", "").await.unwrap();

        assert_matches!(
            verify_token(&config(), &store, &first.token).await,
            Err(AuthError::VersionMismatch { presented: 1, current: 2 })
        );
        assert!(verify_token(&config(), &store, &second.token).await.is_ok());
    }

    #[tokio::test]
    async fn revoke_invalidates() {
        let store = InMemoryVersionStore::new();
        let issued = issue_token(&config(), &store, "u", "").await.unwrap();
        revoke(&store, "u").await.unwrap();
        assert_matches!(
            verify_token(&config(), &store, &issued.token).await,
            Err(AuthError::VersionMismatch { .. })
        );
    }

    #[tokio::test]
    async fn wrong_secret_rejected() {
        let store = InMemoryVersionStore::new();
        let issued = issue_token(&config(), &store, "u", "").await.unwrap();
        let other = TokenConfig::new("other-secret");
        assert_matches!(
            verify_token(&other, &store, &issued.token).await,
            Err(AuthError::Jwt(_))
        );
    }

    #[tokio::test]
    async fn expired_token_rejected_beyond_skew() {
        let store = InMemoryVersionStore::new();
        let ver = store.incr_version("u").await.unwrap();
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            uid: "u".into(),
            seq: String::new(),
            ver,
            sub: "u".into(),
            jti: "j".into(),
            iat: now - 3600,
            exp: now - 120,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert_matches!(
            verify_token(&config(), &store, &token).await,
            Err(AuthError::Jwt(_))
        );

        let mut lenient = config();
        lenient.clock_skew = Duration::from_secs(600);
        assert!(verify_token(&lenient, &store, &token).await.is_ok());
    }

    #[tokio::test]
    async fn empty_secret_rejected() {
        let store = InMemoryVersionStore::new();
        let cfg = TokenConfig::new("");
        assert_matches!(
            issue_token(&cfg, &store, "u", "").await,
            Err(AuthError::EmptySecret)
        );
        assert_matches!(
            verify_token(&cfg, &store, "x.y.z").await,
            Err(AuthError::EmptySecret)
        );
    }

    #[tokio::test]
    async fn zero_ttl_uses_default() {
        let store = InMemoryVersionStore::new();
        let mut cfg = config();
        cfg.ttl = Duration::ZERO;
        let issued = issue_token(&cfg, &store, "u", "").await.unwrap();
        assert_eq!(issued.expires_in, DEFAULT_TTL.as_secs());
    }

    #[tokio::test]
    async fn parse_unverified_reads_claims() {
        let store = InMemoryVersionStore::new();
        let issued = issue_token(&config(), &store, "u", "seq-9").await.unwrap();
        let claims = parse_unverified(&issued.token).unwrap();
        assert_eq!(claims.seq, "seq-9");
        assert!(parse_unverified("garbage").is_err());
    }
}
