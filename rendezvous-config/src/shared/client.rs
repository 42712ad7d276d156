use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::shared::ValidationError;

/// Settings a worker needs to reach a rendezvous server.
///
/// This intentionally does not implement [`serde::Serialize`] so the shared
/// secret cannot leak into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// `host:port` of the server, as printed by the server at startup.
    pub address: String,
    /// Base64 shared secret printed by the server at startup.
    pub secret: SecretString,
    /// Time allowed to establish the TCP connection and complete the handshake.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl ClientConfig {
    /// Default connect timeout: 10 seconds.
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Creates a client configuration with the default connect timeout.
    pub fn new(address: impl Into<String>, secret: SecretString) -> Self {
        Self {
            address: address.into(),
            secret,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    /// Validates the client configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.address.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "address".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.secret.expose_secret().trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "secret".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.connect_timeout_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "connect_timeout_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_connect_timeout_ms() -> u64 {
    ClientConfig::DEFAULT_CONNECT_TIMEOUT_MS
}
