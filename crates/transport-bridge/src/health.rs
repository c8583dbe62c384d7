//! `/health` endpoint body.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"draining"` once a graceful stop began.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered bridge sessions.
    pub active_sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, active_sessions: usize, shutting_down: bool) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "draining" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        active_sessions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, false);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn draining_while_shutting_down() {
        assert_eq!(health_check(Instant::now(), 3, true).status, "draining");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, 0, false).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let json = serde_json::to_value(health_check(Instant::now(), 2, false)).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["active_sessions"], 2);
        assert!(json["uptime_secs"].is_number());
    }
}
