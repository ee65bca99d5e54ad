use std::fmt;
use std::sync::Arc;

use link_protocol::{Handshake, Request, Response};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identity of one transport session. A reconnect gets a fresh id even
/// when the link claims the same dsId.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        ClientId(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Transport handle for one connected party.
///
/// Writes are non-blocking enqueues onto the party's single outbound path;
/// how bytes reach the wire is up to the implementation.
pub trait Client: Send + Sync {
    fn id(&self) -> ClientId;

    fn handshake(&self) -> &Handshake;

    /// Requests the broker sends to this party's responder.
    fn write_request(&self, batch: Vec<Request>);

    /// Responses the broker sends to this party's requester.
    fn write_response(&self, batch: Vec<Response>);
}

impl fmt::Debug for dyn Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id())
            .field("ds_id", &self.handshake().ds_id)
            .finish()
    }
}

/// Whatever a [`ChannelClient`] was asked to write.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Requests(Vec<Request>),
    Responses(Vec<Response>),
}

/// A [`Client`] backed by an unbounded channel. The receiving half is
/// drained by a writer task (see `transport`) or inspected directly.
#[derive(Debug, Clone)]
pub struct ChannelClient {
    id: ClientId,
    handshake: Handshake,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelClient {
    pub fn new(handshake: Handshake) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            id: ClientId::new(),
            handshake,
            tx,
        });
        (client, rx)
    }

    /// A local requester that never acts as a responder.
    pub fn requester(name: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        Self::new(Handshake::new(name, true, false))
    }

    fn push(&self, out: Outbound) {
        // A closed receiver means the session is gone; the broker learns
        // that through `disconnected`, not through writes.
        if self.tx.send(out).is_err() {
            tracing::debug!(client = %self.id, "dropping write for closed session");
        }
    }
}

impl Client for ChannelClient {
    fn id(&self) -> ClientId {
        self.id
    }

    fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    fn write_request(&self, batch: Vec<Request>) {
        if !batch.is_empty() {
            self.push(Outbound::Requests(batch));
        }
    }

    fn write_response(&self, batch: Vec<Response>) {
        if !batch.is_empty() {
            self.push(Outbound::Responses(batch));
        }
    }
}
