//! Access/refresh token pairs.
//!
//! Access tokens are short-lived and can be revoked one at a time by putting
//! their `jti` on an [`AccessTokenBlocklist`]. Refresh tokens are one-time:
//! [`consume_refresh`] removes the `jti` from the [`RefreshTokenStore`], so a
//! replayed refresh token fails with [`AuthError::RefreshNotFound`].

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AuthError, Result};
use crate::store::TokenVersionStore;
use crate::token::expires_after;

/// Access token lifetime used when [`PairConfig::access_ttl`] is zero.
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(30 * 60);
/// Refresh token lifetime used when [`PairConfig::refresh_ttl`] is zero.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(72 * 60 * 60);

/// Signing configuration for token pairs.
#[derive(Clone, Debug)]
pub struct PairConfig {
    /// HS256 shared secret.
    pub secret: String,
    /// Access token lifetime; zero means [`DEFAULT_ACCESS_TTL`].
    pub access_ttl: Duration,
    /// Refresh token lifetime; zero means [`DEFAULT_REFRESH_TTL`].
    pub refresh_ttl: Duration,
    /// Leeway applied to the expiry check.
    pub clock_skew: Duration,
}

impl PairConfig {
    /// Config with default lifetimes and no skew.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            clock_skew: Duration::ZERO,
        }
    }

    fn access_ttl(&self) -> Duration {
        if self.access_ttl.is_zero() { DEFAULT_ACCESS_TTL } else { self.access_ttl }
    }

    fn refresh_ttl(&self) -> Duration {
        if self.refresh_ttl.is_zero() { DEFAULT_REFRESH_TTL } else { self.refresh_ttl }
    }

    fn check_secret(&self) -> Result<()> {
        if self.secret.is_empty() {
            return Err(AuthError::EmptySecret);
        }
        Ok(())
    }

    fn decode<C: DeserializeOwned>(&self, token: &str) -> Result<C> {
        self.check_secret()?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.clock_skew.as_secs();
        validation.validate_aud = false;
        let data = jsonwebtoken::decode::<C>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &validation)?;
        Ok(data.claims)
    }

    fn sign<C: Serialize>(&self, claims: &C) -> Result<String> {
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }
}

/// The `type` claim distinguishing the two halves of a pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Presented on every stream or request.
    Access,
    /// Exchanged once for a new pair.
    Refresh,
}

impl TokenKind {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }

    fn expect(self, expected: Self) -> Result<()> {
        if self != expected {
            return Err(AuthError::WrongTokenType { expected, found: self });
        }
        Ok(())
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user or node) id.
    pub uid: String,
    /// Caller-defined login sequence.
    #[serde(default)]
    pub seq: String,
    /// Session version; `0` when issued without one.
    #[serde(default)]
    pub ver: u64,
    /// Always [`TokenKind::Access`] for a valid token.
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Registered subject claim.
    pub sub: String,
    /// Unique token id, the blocklist key.
    pub jti: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

/// Claims carried by a refresh token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject (user or node) id.
    pub uid: String,
    /// Caller-defined login sequence.
    #[serde(default)]
    pub seq: String,
    /// Always [`TokenKind::Refresh`] for a valid token.
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Registered subject claim.
    pub sub: String,
    /// Unique token id, the refresh store key.
    pub jti: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

/// A freshly issued access/refresh pair.
#[derive(Clone, Debug)]
pub struct TokenPair {
    /// Encoded access JWT.
    pub access_token: String,
    /// Encoded refresh JWT.
    pub refresh_token: String,
    /// Absolute access expiry.
    pub access_expires_at: DateTime<Utc>,
    /// Absolute refresh expiry.
    pub refresh_expires_at: DateTime<Utc>,
    /// Access lifetime in seconds.
    pub access_expires_in: u64,
    /// Refresh lifetime in seconds.
    pub refresh_expires_in: u64,
    /// Access `jti`, for revocation.
    pub access_jti: String,
    /// Refresh `jti`, as saved in the refresh store.
    pub refresh_jti: String,
}

/// What the refresh store remembers about an outstanding refresh token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshMetadata {
    /// Subject the token was issued to; empty skips the check.
    pub subject: String,
    /// Login sequence; empty skips the check.
    pub sequence: String,
}

/// One-time refresh token persistence.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Remember `jti` for `ttl`.
    async fn save(&self, jti: &str, meta: RefreshMetadata, ttl: Duration) -> Result<()>;
    /// Remove `jti` and return its metadata. Unknown or expired ids fail
    /// with [`AuthError::RefreshNotFound`].
    async fn consume(&self, jti: &str) -> Result<RefreshMetadata>;
}

/// Revoked access token ids.
#[async_trait]
pub trait AccessTokenBlocklist: Send + Sync {
    /// Block `jti` for `ttl`.
    async fn block(&self, jti: &str, ttl: Duration) -> Result<()>;
    /// Whether `jti` is currently blocked.
    async fn is_blocked(&self, jti: &str) -> Result<bool>;
}

/// Process-local [`RefreshTokenStore`].
#[derive(Debug, Default)]
pub struct InMemoryRefreshStore {
    entries: Mutex<HashMap<String, (RefreshMetadata, Instant)>>,
}

impl InMemoryRefreshStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding, unexpired refresh tokens.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|(_, until)| *until > now).count()
    }

    /// Whether no refresh token is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshStore {
    async fn save(&self, jti: &str, meta: RefreshMetadata, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, until)| *until > now);
        let _ = entries.insert(jti.to_owned(), (meta, now + ttl));
        Ok(())
    }

    async fn consume(&self, jti: &str) -> Result<RefreshMetadata> {
        match self.entries.lock().remove(jti) {
            Some((meta, until)) if until > Instant::now() => Ok(meta),
            _ => Err(AuthError::RefreshNotFound),
        }
    }
}

/// Process-local [`AccessTokenBlocklist`].
#[derive(Debug, Default)]
pub struct InMemoryBlocklist {
    blocked: Mutex<HashMap<String, Instant>>,
}

impl InMemoryBlocklist {
    /// Create an empty blocklist.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessTokenBlocklist for InMemoryBlocklist {
    async fn block(&self, jti: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut blocked = self.blocked.lock();
        blocked.retain(|_, until| *until > now);
        let _ = blocked.insert(jti.to_owned(), now + ttl);
        Ok(())
    }

    async fn is_blocked(&self, jti: &str) -> Result<bool> {
        Ok(self
            .blocked
            .lock()
            .get(jti)
            .is_some_and(|until| *until > Instant::now()))
    }
}

/// Issue an access/refresh pair for `subject` carrying session `version`.
///
/// When `store` is given the refresh `jti` is saved so it can be consumed
/// exactly once.
pub async fn issue_pair(
    config: &PairConfig,
    store: Option<&dyn RefreshTokenStore>,
    subject: &str,
    sequence: &str,
    version: u64,
) -> Result<TokenPair> {
    config.check_secret()?;
    let access_ttl = config.access_ttl();
    let refresh_ttl = config.refresh_ttl();
    let now = Utc::now();
    let access_expires_at = expires_after(now, access_ttl)?;
    let refresh_expires_at = expires_after(now, refresh_ttl)?;

    let access = AccessClaims {
        uid: subject.to_owned(),
        seq: sequence.to_owned(),
        ver: version,
        kind: TokenKind::Access,
        sub: subject.to_owned(),
        jti: uuid::Uuid::new_v4().to_string(),
        iat: now.timestamp(),
        exp: access_expires_at.timestamp(),
    };
    let refresh = RefreshClaims {
        uid: subject.to_owned(),
        seq: sequence.to_owned(),
        kind: TokenKind::Refresh,
        sub: subject.to_owned(),
        jti: uuid::Uuid::new_v4().to_string(),
        iat: now.timestamp(),
        exp: refresh_expires_at.timestamp(),
    };
    let access_token = config.sign(&access)?;
    let refresh_token = config.sign(&refresh)?;

    if let Some(store) = store {
        let meta = RefreshMetadata {
            subject: subject.to_owned(),
            sequence: sequence.to_owned(),
        };
        store.save(&refresh.jti, meta, refresh_ttl).await?;
    }

    debug!(subject, version, "issued token pair");
    Ok(TokenPair {
        access_token,
        refresh_token,
        access_expires_at,
        refresh_expires_at,
        access_expires_in: access_ttl.as_secs(),
        refresh_expires_in: refresh_ttl.as_secs(),
        access_jti: access.jti,
        refresh_jti: refresh.jti,
    })
}

/// Verify an access token's signature, expiry, and type, and that its
/// `jti` is not blocked.
pub async fn verify_access(
    config: &PairConfig,
    token: &str,
    blocklist: Option<&dyn AccessTokenBlocklist>,
) -> Result<AccessClaims> {
    let claims: AccessClaims = config.decode(token)?;
    claims.kind.expect(TokenKind::Access)?;
    if let Some(blocklist) = blocklist {
        if !claims.jti.is_empty() && blocklist.is_blocked(&claims.jti).await? {
            return Err(AuthError::Revoked);
        }
    }
    Ok(claims)
}

/// [`verify_access`], then require the token's version to match the
/// subject's current one. Subjects with no version yet (`0`) accept any.
pub async fn verify_access_with_version(
    config: &PairConfig,
    token: &str,
    blocklist: Option<&dyn AccessTokenBlocklist>,
    versions: &dyn TokenVersionStore,
) -> Result<AccessClaims> {
    let claims = verify_access(config, token, blocklist).await?;
    let current = versions.get_version(&claims.uid).await?;
    if current > 0 && claims.ver != current {
        return Err(AuthError::VersionMismatch {
            presented: claims.ver,
            current,
        });
    }
    Ok(claims)
}

/// Verify a refresh token and consume its `jti`. A second call with the
/// same token fails.
pub async fn consume_refresh(
    config: &PairConfig,
    token: &str,
    store: &dyn RefreshTokenStore,
) -> Result<RefreshClaims> {
    let claims: RefreshClaims = config.decode(token)?;
    claims.kind.expect(TokenKind::Refresh)?;
    if claims.jti.is_empty() {
        return Err(AuthError::MissingJti);
    }
    let meta = store.consume(&claims.jti).await?;
    if !meta.subject.is_empty() && meta.subject != claims.uid {
        return Err(AuthError::RefreshMismatch("subject"));
    }
    if !meta.sequence.is_empty() && meta.sequence != claims.seq {
        return Err(AuthError::RefreshMismatch("sequence"));
    }
    Ok(claims)
}

/// Consume `refresh_token` and issue a replacement pair for the same subject
/// and sequence.
pub async fn refresh_pair(
    config: &PairConfig,
    refresh_token: &str,
    store: &dyn RefreshTokenStore,
    version: u64,
) -> Result<TokenPair> {
    let claims = consume_refresh(config, refresh_token, store).await?;
    issue_pair(config, Some(store), &claims.uid, &claims.seq, version).await
}

/// Block an access token until it would have expired anyway (at least one
/// second).
pub async fn revoke_access(claims: &AccessClaims, blocklist: &dyn AccessTokenBlocklist) -> Result<()> {
    if claims.jti.is_empty() {
        return Err(AuthError::MissingJti);
    }
    let remaining = u64::try_from(claims.exp - Utc::now().timestamp()).unwrap_or(0);
    let ttl = Duration::from_secs(remaining.max(1));
    blocklist.block(&claims.jti, ttl).await
}
