//! Process wide shutdown signal.
//!
//! The server's accept loop selects on a [`ShutdownRx`] next to `accept()`.
//! Once a shutdown is requested no new connections are accepted and the
//! connection tasks are dropped with the loop; in-memory barrier state does
//! not outlive the process.

use tokio::sync::watch;

/// Receiver side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Requests a shutdown from every receiver subscribed to this channel.
    ///
    /// Fails only when every receiver has already been dropped.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Creates a new receiver that observes future shutdown requests.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Creates a connected pair of shutdown transmitter and receiver.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}
