//! Concurrency utilities shared by the server's accept loop and its sessions.

pub mod shutdown;
