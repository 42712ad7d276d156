use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// What a barrier does when a blocked party goes away before release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonPolicy {
    /// Break the current generation so the remaining parties fail fast.
    #[default]
    Break,
    /// Retract the arrival as if the party never called `wait`.
    Withdraw,
}

impl AbandonPolicy {
    /// Returns the configuration name of the policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            AbandonPolicy::Break => "break",
            AbandonPolicy::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for AbandonPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of one rendezvous server process.
///
/// Every barrier created by the process uses the same party count, so a run
/// with a given set of workers needs exactly one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the server binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the server listens on. `0` picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of parties every barrier waits for.
    pub nprocs: usize,
    /// Timeout applied to waits that do not carry their own.
    ///
    /// `None` blocks until the barrier fills.
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
    /// Behavior when a waiting party disconnects.
    #[serde(default)]
    pub abandon_policy: AbandonPolicy,
    /// Time a new connection has to present the shared secret.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Port for the Prometheus exporter; disabled when `None`.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl ServerConfig {
    /// Default bind address.
    pub const DEFAULT_HOST: &'static str = "0.0.0.0";

    /// Default listening port.
    pub const DEFAULT_PORT: u16 = 50000;

    /// Default handshake timeout: 10 seconds.
    pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

    /// Creates a configuration for `nprocs` parties with every other field at its default.
    pub fn new(nprocs: usize) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            nprocs,
            wait_timeout_ms: None,
            abandon_policy: AbandonPolicy::default(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            metrics_port: None,
        }
    }

    /// Validates the server configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.nprocs == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "nprocs".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.handshake_timeout_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "handshake_timeout_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.wait_timeout_ms == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "wait_timeout_ms".to_string(),
                constraint: "must be greater than 0 when set".to_string(),
            });
        }

        if self.port != 0 && self.metrics_port == Some(self.port) {
            return Err(ValidationError::ConflictingFields {
                first: "port".to_string(),
                second: "metrics_port".to_string(),
            });
        }

        Ok(())
    }

    /// Returns the `host:port` pair to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the default wait timeout, if any.
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the handshake timeout.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

fn default_host() -> String {
    ServerConfig::DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    ServerConfig::DEFAULT_PORT
}

fn default_handshake_timeout_ms() -> u64 {
    ServerConfig::DEFAULT_HANDSHAKE_TIMEOUT_MS
}
