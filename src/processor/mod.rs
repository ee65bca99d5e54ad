//! Per-link session object. Owns the link's two protocol roles: the
//! [`Responder`] the broker talks to, and the [`Requester`] bookkeeping for
//! requests the link sends to the broker.

pub mod requester;
pub mod responder;

use std::sync::Arc;

use crate::client::{Client, ClientId};
use crate::error::BrokerError;
use crate::logger::Logger;
use crate::stream::Released;

pub use requester::Requester;
pub use responder::{Responder, ResponderStats};

pub struct MessageProcessor {
    responder: Responder,
    requester: Requester,
}

impl MessageProcessor {
    pub fn new(link: impl Into<String>, logger: Logger) -> Self {
        Self {
            responder: Responder::new(link, logger),
            requester: Requester::new(),
        }
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    pub fn initialize(&self, client: Arc<dyn Client>) -> Result<(), BrokerError> {
        self.responder.attach(client)
    }

    /// Pauses the tables; `None` for a client that is not the current one.
    pub fn disconnected(&self, client: ClientId) -> Option<Vec<Released>> {
        self.responder.detach(client)
    }
}

impl std::fmt::Debug for MessageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageProcessor")
            .field("link", &self.responder.link())
            .field("stats", &self.responder.stats())
            .finish()
    }
}
