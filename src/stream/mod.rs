//! Per-link correlation tables.
//!
//! Each table maps a broker-assigned upstream id to the local requesters
//! waiting on it. The tables themselves are plain data; the owning
//! [`Responder`](crate::processor::Responder) serializes access to them.

pub mod generic;
pub mod list;
pub mod sub;

use std::fmt;
use std::sync::Arc;

use link_protocol::Method;

use crate::client::{Client, ClientId};

pub use generic::{GenericStream, GenericTable};
pub use list::ListTable;
pub use sub::SubTable;

/// A local requester waiting on a stream, under its own id.
#[derive(Clone)]
pub struct Waiter {
    pub client: Arc<dyn Client>,
    pub id: u32,
}

impl Waiter {
    pub fn new(client: Arc<dyn Client>, id: u32) -> Self {
        Self { client, id }
    }

    pub fn client_id(&self) -> ClientId {
        self.client.id()
    }

    pub fn released(&self, upstream: u32) -> Released {
        Released {
            client: self.client_id(),
            id: self.id,
            upstream,
        }
    }
}

/// A waiter whose stream ended on the link's side: terminal response,
/// disconnect purge or link removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    pub client: ClientId,
    /// The requester's own rid.
    pub id: u32,
    pub upstream: u32,
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("client", &self.client.id())
            .field("id", &self.id)
            .finish()
    }
}

/// Identifies a stream registered on a link, returned to the caller so it
/// can later unsubscribe or close.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    /// Name of the link node owning the stream.
    pub link: String,
    /// Link-relative path.
    pub path: String,
    pub method: Method,
    /// Upstream sid for subscriptions, upstream rid otherwise.
    pub upstream: u32,
}

impl StreamHandle {
    pub fn new(link: impl Into<String>, path: impl Into<String>, method: Method, upstream: u32) -> Self {
        Self {
            link: link.into(),
            path: path.into(),
            method,
            upstream,
        }
    }
}
