//! Logging and metrics setup shared by the rendezvous binaries.

pub mod metrics;
pub mod tracing;
