//! Per-subject token version storage.
//!
//! Each subject has one monotonically increasing version. Issuing a token
//! bumps it, so every older token for that subject stops verifying.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::Result;

/// Backing store for token versions.
#[async_trait]
pub trait TokenVersionStore: Send + Sync {
    /// Increment the subject's version and return the new value.
    async fn incr_version(&self, subject: &str) -> Result<u64>;
    /// Current version, `0` for unknown subjects.
    async fn get_version(&self, subject: &str) -> Result<u64>;
}

/// Process-local [`TokenVersionStore`].
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    versions: Mutex<HashMap<String, u64>>,
}

impl InMemoryVersionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenVersionStore for InMemoryVersionStore {
    async fn incr_version(&self, subject: &str) -> Result<u64> {
        let mut versions = self.versions.lock();
        let v = versions.entry(subject.to_owned()).or_insert(0);
        *v += 1;
        Ok(*v)
    }

    async fn get_version(&self, subject: &str) -> Result<u64> {
        Ok(self.versions.lock().get(subject).copied().unwrap_or(0))
    }
}
