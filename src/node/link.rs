use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};

use crate::client::{Client, ClientId};
use crate::error::BrokerError;
use crate::logger::Logger;
use crate::processor::MessageProcessor;
use crate::stream::Released;

use super::{BrokerNode, NodeRole, PROFILE_LINK};

#[derive(Debug, Default)]
struct LinkAttachment {
    /// Reserved by the first successful handshake.
    ds_id: Option<String>,
    client: Option<ClientId>,
    disconnected_at: Option<DateTime<Utc>>,
    link_data: Option<Value>,
}

/// Role data of a node that stands for one link.
///
/// Lock order: attachment, then the processor's tables.
pub struct LinkNode {
    attachment: Mutex<LinkAttachment>,
    processor: MessageProcessor,
}

impl LinkNode {
    pub fn new(name: &str, ds_id: Option<String>, logger: Logger) -> Self {
        Self {
            attachment: Mutex::new(LinkAttachment {
                ds_id,
                ..LinkAttachment::default()
            }),
            processor: MessageProcessor::new(name, logger),
        }
    }

    fn attachment(&self) -> MutexGuard<'_, LinkAttachment> {
        self.attachment.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn processor(&self) -> &MessageProcessor {
        &self.processor
    }

    pub fn ds_id(&self) -> Option<String> {
        self.attachment().ds_id.clone()
    }

    pub fn client(&self) -> Option<ClientId> {
        self.attachment().client
    }

    pub fn is_connected(&self) -> bool {
        self.attachment().client.is_some()
    }

    pub fn disconnected_at(&self) -> Option<DateTime<Utc>> {
        self.attachment().disconnected_at
    }

    pub fn link_data(&self) -> Option<Value> {
        self.attachment().link_data.clone()
    }

    pub(super) fn append_state(&self, updates: &mut Vec<Value>) {
        let attachment = self.attachment();
        if let Some(data) = &attachment.link_data {
            updates.push(json!(["$linkData", data]));
        }
        if let Some(ts) = attachment.disconnected_at {
            updates.push(json!([
                "disconnectedTs",
                ts.to_rfc3339_opts(SecondsFormat::Millis, true)
            ]));
        }
    }
}

impl BrokerNode {
    /// A link node to be added under `parent`. It stays inaccessible until
    /// a responder connects.
    pub fn new_link(parent: &str, name: &str, ds_id: Option<String>, logger: Logger) -> Self {
        let node = Self::with_role(
            Some(parent),
            name,
            PROFILE_LINK,
            NodeRole::Link(LinkNode::new(name, ds_id, logger)),
        );
        node.set_accessible(false);
        node
    }

    pub fn as_link(&self) -> Option<&LinkNode> {
        match self.role() {
            NodeRole::Link(link) => Some(link),
            NodeRole::Plain => None,
        }
    }

    /// Attach `client` to this link node.
    ///
    /// Fails without touching the node when the handshake claims another
    /// dsId than the reserved one, or when a connection is already live.
    pub fn connected(&self, client: Arc<dyn Client>) -> Result<(), BrokerError> {
        let link = self
            .as_link()
            .ok_or_else(|| BrokerError::ProtocolViolation(format!("`{}` is not a link node", self.path())))?;
        let handshake = client.handshake().clone();

        let mut attachment = link.attachment();
        if let Some(reserved) = &attachment.ds_id {
            if reserved != &handshake.ds_id {
                return Err(BrokerError::IdentityMismatch {
                    node: self.path().to_string(),
                    expected: reserved.clone(),
                    actual: handshake.ds_id,
                });
            }
        }
        if attachment.client.is_some() {
            return Err(BrokerError::ProtocolViolation(format!(
                "`{}` already has a live connection",
                self.path()
            )));
        }

        let id = client.id();
        link.processor.initialize(client)?;
        attachment.ds_id = Some(handshake.ds_id);
        attachment.client = Some(id);
        attachment.disconnected_at = None;
        if handshake.is_responder {
            attachment.link_data = handshake.link_data;
            self.set_accessible(true);
        } else {
            attachment.link_data = None;
            self.set_accessible(false);
        }
        Ok(())
    }

    /// Transport loss for `client`. Returns `None` and changes nothing when
    /// `client` is not the current connection, otherwise the waiters whose
    /// calls were failed.
    pub fn disconnected(&self, client: ClientId) -> Option<Vec<Released>> {
        let link = self.as_link()?;
        let mut attachment = link.attachment();
        if attachment.client != Some(client) {
            return None;
        }
        let released = link.processor.disconnected(client).unwrap_or_default();
        attachment.client = None;
        attachment.disconnected_at = Some(Utc::now());
        Some(released)
    }
}
