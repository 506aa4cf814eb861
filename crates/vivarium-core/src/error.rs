//! Crate-level errors plus the boundary taxonomy both HTTP surfaces map onto.

use thiserror::Error;

/// Errors produced inside the core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("ledger I/O failed: {0}")]
    LedgerIo(#[from] std::io::Error),
    #[error("ledger file is corrupt: {0}")]
    LedgerCorrupt(#[from] serde_json::Error),
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("{0}")]
    Validation(String),
}

/// Client-facing error classes. Handlers never leak details past this: the
/// kind plus a generic message go on the wire, the full error goes to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    NotFound,
    Conflict,
    DeadState,
    RateLimited,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Auth => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::DeadState => 410,
            ErrorKind::RateLimited => 429,
            ErrorKind::Internal => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::DeadState => "dead_state",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Internal => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ErrorKind::Validation.status_code(), 400);
        assert_eq!(ErrorKind::Auth.status_code(), 403);
        assert_eq!(ErrorKind::Conflict.status_code(), 409);
        assert_eq!(ErrorKind::DeadState.status_code(), 410);
        assert_eq!(ErrorKind::RateLimited.status_code(), 429);
        assert_eq!(ErrorKind::Internal.status_code(), 500);
    }
}
