use link_protocol::Handshake;
use tokio::sync::oneshot;

use crate::error::BrokerError;

/// Start a handshake: the transport keeps the resolver and completes it
/// from its own callback, the broker side waits on the pending half.
pub fn handshake_channel() -> (HandshakeResolver, PendingHandshake) {
    let (tx, rx) = oneshot::channel();
    (HandshakeResolver { tx }, PendingHandshake { rx })
}

/// Completes a pending handshake. Consumed on use, so it resolves at most once.
#[derive(Debug)]
pub struct HandshakeResolver {
    tx: oneshot::Sender<Result<Handshake, String>>,
}

impl HandshakeResolver {
    /// Returns `false` when the waiting side already gave up.
    pub fn resolve(self, result: Result<Handshake, String>) -> bool {
        self.tx.send(result).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct PendingHandshake {
    rx: oneshot::Receiver<Result<Handshake, String>>,
}

impl PendingHandshake {
    pub async fn wait(self) -> Result<Handshake, BrokerError> {
        match self.rx.await {
            Ok(Ok(handshake)) => Ok(handshake),
            Ok(Err(reason)) => Err(BrokerError::HandshakeFailed(reason)),
            Err(_) => Err(BrokerError::HandshakeCancelled),
        }
    }

    /// Give up on the handshake; a later `resolve` reports `false`.
    pub fn cancel(mut self) {
        self.rx.close();
    }
}
