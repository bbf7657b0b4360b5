//! Correlation Tokens
//!
//! Every outgoing request carries a token that the server echoes back on its
//! reply. Tokens combine a nanosecond timestamp with a per-engine sequence
//! number, so they stay unique across engine restarts within a process and
//! strictly ordered by sequence under concurrent callers.

use std::fmt;

use chrono::Utc;

/// Opaque token pairing a reply with its request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Create a token from a raw string.
    #[must_use]
    pub const fn new(value: String) -> Self {
        Self(value)
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the token is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the token and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Monotonic token generator.
///
/// Not synchronized on its own; the owner keeps it behind the same lock that
/// guards the pending-request registry.
#[derive(Debug, Default)]
pub struct TokenSequence {
    counter: u64,
}

impl TokenSequence {
    /// Create a new sequence starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { counter: 0 }
    }

    /// Produce the next token.
    pub fn next_token(&mut self) -> CorrelationToken {
        self.counter = self.counter.wrapping_add(1);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        CorrelationToken(format!("{nanos}-{}", self.counter))
    }

    /// Number of tokens issued so far.
    #[must_use]
    pub const fn issued(&self) -> u64 {
        self.counter
    }
}
