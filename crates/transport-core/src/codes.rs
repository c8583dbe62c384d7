//! Structured error codes shared across services.
//!
//! Codes are five digits: the leading three mirror the closest HTTP status,
//! the trailing two disambiguate within it.

use std::fmt;

/// A stable, machine-readable error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Numeric code, e.g. `40101`.
    pub numeric: i32,
    /// Symbolic code, e.g. `"TOKEN_INVALID"`.
    pub symbol: &'static str,
    /// Default human-readable message.
    pub message: &'static str,
}

impl ErrorCode {
    /// HTTP status the code maps to (`40101` → `401`).
    pub fn http_status(self) -> u16 {
        u16::try_from(self.numeric / 100).unwrap_or(500)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.numeric, self.symbol, self.message)
    }
}

/// Missing, malformed, expired, or revoked token.
pub const UNAUTHORIZED: ErrorCode = ErrorCode {
    numeric: 40101,
    symbol: "TOKEN_INVALID",
    message: "token is invalid or expired",
};

/// Authenticated but not allowed.
pub const PERMISSION_DENIED: ErrorCode = ErrorCode {
    numeric: 40301,
    symbol: "PERMISSION_DENIED",
    message: "permission denied",
};

/// Payload failed validation.
pub const INVALID_PAYLOAD: ErrorCode = ErrorCode {
    numeric: 41001,
    symbol: "INVALID_PAYLOAD",
    message: "payload is invalid",
};

/// Caller exceeded its rate limit.
pub const TOO_MANY_REQUESTS: ErrorCode = ErrorCode {
    numeric: 42901,
    symbol: "RATE_LIMITED",
    message: "too many requests",
};

/// Unexpected server-side failure.
pub const INTERNAL: ErrorCode = ErrorCode {
    numeric: 50001,
    symbol: "INTERNAL_ERROR",
    message: "internal error",
};

/// Every known code.
pub const REGISTRY: &[ErrorCode] = &[
    UNAUTHORIZED,
    PERMISSION_DENIED,
    INVALID_PAYLOAD,
    TOO_MANY_REQUESTS,
    INTERNAL,
];

/// Look a code up by its symbol.
pub fn lookup(symbol: &str) -> Option<ErrorCode> {
    REGISTRY.iter().copied().find(|c| c.symbol == symbol)
}

/// Look a code up by its numeric value.
pub fn lookup_numeric(numeric: i32) -> Option<ErrorCode> {
    REGISTRY.iter().copied().find(|c| c.numeric == numeric)
}
