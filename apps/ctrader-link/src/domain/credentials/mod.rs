//! Application Credentials
//!
//! Identity presented by handshake requests. Secrets never appear in
//! `Debug` output.

/// Application identity, used by handshake requests built on the client.
#[derive(Clone)]
pub struct Credentials {
    client_id: String,
    client_secret: String,
    access_token: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(client_id: String, client_secret: String, access_token: String) -> Self {
        Self {
            client_id,
            client_secret,
            access_token,
        }
    }

    /// Get the application client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Get the application client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Get the account access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &"[REDACTED]")
            .field("client_secret", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}
