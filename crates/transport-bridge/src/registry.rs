//! Registered sessions and fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use transport_core::TransportEnvelope;

use crate::session::BridgeSession;

/// Sessions indexed by session id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<BridgeSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Add a session.
    pub async fn add(&self, session: Arc<BridgeSession>) {
        let mut sessions = self.sessions.write().await;
        let _ = sessions.insert(session.id().to_owned(), session);
    }

    /// Remove a session by id.
    pub async fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        let _ = sessions.remove(session_id);
    }

    /// Look up a session by id.
    pub async fn get(&self, session_id: &str) -> Option<Arc<BridgeSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Number of registered sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Sessions registered under `namespace`.
    pub async fn in_namespace(&self, namespace: &str) -> Vec<Arc<BridgeSession>> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.metadata().namespace == namespace)
            .cloned()
            .collect()
    }

    /// Send `envelope` as a Broadcast to every session. Returns how many
    /// sessions accepted it.
    ///
    /// The map lock is released before sending so a slow peer does not
    /// block registration.
    pub async fn broadcast(&self, envelope: &TransportEnvelope) -> usize {
        let targets: Vec<_> = self.sessions.read().await.values().cloned().collect();
        debug!(recipients = targets.len(), "broadcast envelope to all sessions");
        let mut delivered = 0;
        for session in targets {
            match session.send_broadcast(envelope.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(session_id = session.id(), error = %e, "failed to broadcast to session"),
            }
        }
        delivered
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
