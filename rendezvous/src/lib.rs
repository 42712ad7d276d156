//! Partition rendezvous barrier service.
//!
//! Workers that write the same non-updatable storage partitions synchronize
//! on a per-partition [`barrier::Barrier`] hosted by a [`server::RendezvousServer`].
//! Each partition key maps to exactly one barrier for the life of the server
//! process (see [`registry::BarrierRegistry`]), and workers reach it through
//! an authenticated [`client::RendezvousClient`].

pub mod auth;
pub mod barrier;
pub mod client;
pub mod concurrency;
pub mod error;
mod macros;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod types;
