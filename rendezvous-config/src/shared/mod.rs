//! Shared configuration types for the rendezvous server and its clients.

mod base;
mod client;
mod server;

pub use base::ValidationError;
pub use client::ClientConfig;
pub use server::{AbandonPolicy, ServerConfig};
