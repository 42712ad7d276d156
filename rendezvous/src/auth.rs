//! Shared secret used to authenticate connections.
//!
//! A fresh secret is generated for every server process and handed to workers
//! out of band. It travels as standard base64 and is compared in constant time.

use std::fmt;
use std::str::FromStr;

use base64::{Engine, prelude::BASE64_STANDARD};
use constant_time_eq::constant_time_eq;
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, Secret};

use crate::error::{ErrorKind, RendezvousError, RendezvousResult};
use crate::{bail, rendezvous_error};

/// Length in bytes of a shared secret.
pub const SECRET_LENGTH_IN_BYTES: usize = 32;

/// Secret shared between one server process and its workers.
pub struct SharedSecret {
    key: Secret<[u8; SECRET_LENGTH_IN_BYTES]>,
}

impl SharedSecret {
    /// Generates a new secret from the operating system's random number generator.
    pub fn generate() -> Self {
        let mut key = [0u8; SECRET_LENGTH_IN_BYTES];
        OsRng.fill_bytes(&mut key);

        Self {
            key: Secret::new(key),
        }
    }

    /// Returns the base64 form distributed to workers.
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.key.expose_secret())
    }

    /// Returns whether `presented` (base64) equals this secret.
    ///
    /// Malformed input never matches. The comparison of well-formed input
    /// does not short-circuit on the first differing byte.
    pub fn verify(&self, presented: &str) -> bool {
        match BASE64_STANDARD.decode(presented.trim()) {
            Ok(decoded) => constant_time_eq(&decoded, self.key.expose_secret()),
            Err(_) => false,
        }
    }
}

impl Clone for SharedSecret {
    fn clone(&self) -> Self {
        Self {
            key: Secret::new(*self.key.expose_secret()),
        }
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

impl TryFrom<&str> for SharedSecret {
    type Error = RendezvousError;

    /// Parses a base64 secret that decodes to exactly [`SECRET_LENGTH_IN_BYTES`] bytes.
    fn try_from(value: &str) -> RendezvousResult<Self> {
        let decoded = BASE64_STANDARD.decode(value.trim()).map_err(|err| {
            rendezvous_error!(
                ErrorKind::InvalidSecret,
                "Shared secret is not base64 encoded",
                source: err
            )
        })?;

        if decoded.len() != SECRET_LENGTH_IN_BYTES {
            bail!(
                ErrorKind::InvalidSecret,
                "Shared secret has the wrong length",
                format!(
                    "expected {SECRET_LENGTH_IN_BYTES} bytes, got {}",
                    decoded.len()
                )
            );
        }

        let mut key = [0u8; SECRET_LENGTH_IN_BYTES];
        key.copy_from_slice(&decoded);

        Ok(Self {
            key: Secret::new(key),
        })
    }
}

impl FromStr for SharedSecret {
    type Err = RendezvousError;

    fn from_str(s: &str) -> RendezvousResult<Self> {
        SharedSecret::try_from(s)
    }
}
