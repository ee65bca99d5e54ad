use std::sync::Arc;

use dashmap::DashMap;
use link_protocol::{Envelope, Method, Request, Response, Rid, Sid};
use serde_json::{Map, Value};

use crate::client::{Client, ClientId};
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::logger::Logger;
use crate::node::{BrokerNode, ListReply, NodeTree};
use crate::stream::{Released, StreamHandle};

/// Length of the base64url public-key hash links append to their dsId.
const DS_ID_HASH_LEN: usize = 43;

/// Node name for a link claiming `ds_id`: the dsId minus its trailing
/// `-<hash>` when it carries one.
pub fn link_name(ds_id: &str) -> &str {
    match ds_id.rsplit_once('-') {
        Some((name, hash)) if !name.is_empty() && hash.len() == DS_ID_HASH_LEN => name,
        _ => ds_id,
    }
}

/// Entry point for everything that talks to the broker: link sessions
/// through [`connect`](Broker::connect) / [`handle_message`](Broker::handle_message),
/// local requesters through the path-based calls.
pub struct Broker {
    tree: NodeTree,
    config: BrokerConfig,
    logger: Logger,
    sessions: DashMap<ClientId, Arc<BrokerNode>>,
}

impl Broker {
    pub fn new(config: BrokerConfig, logger: Logger) -> Result<Self, BrokerError> {
        let tree = NodeTree::new(&config.downstream, logger.clone())?;
        Ok(Self {
            tree,
            config,
            logger,
            sessions: DashMap::new(),
        })
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Attach a link whose handshake already completed.
    pub fn connect(&self, client: Arc<dyn Client>) -> Result<Arc<BrokerNode>, BrokerError> {
        let ds_id = client.handshake().ds_id.clone();
        let name = link_name(&ds_id);
        if name.is_empty() || name.contains('/') {
            return Err(BrokerError::HandshakeFailed(format!("unusable dsId `{ds_id}`")));
        }
        let node = self.tree.get_or_create_link(name)?;
        if let Err(err) = node.connected(client.clone()) {
            self.logger.warn("broker", &format!("rejected `{ds_id}`: {err}"));
            return Err(err);
        }
        self.sessions.insert(client.id(), node.clone());
        self.logger.info(
            "broker",
            &format!("link `{ds_id}` connected at {}", node.path()),
        );
        Ok(node)
    }

    /// Transport loss for `client`. Streams the link opened as a requester
    /// are released; its responder tables follow the disconnect policy.
    pub fn disconnect(&self, client: ClientId) {
        let Some((_, node)) = self.sessions.remove(&client) else {
            self.logger
                .debug("broker", &format!("ignoring disconnect of unknown session {client}"));
            return;
        };
        let Some(released) = node.disconnected(client) else {
            self.logger
                .warn("broker", &format!("ignoring stale disconnect for {}", node.path()));
            return;
        };
        self.release_requests(&node, client);
        self.untrack(node.name(), released);
        self.logger.info("broker", &format!("link {} disconnected", node.path()));
    }

    /// Remove a link node for good. Whatever it holds as a requester on
    /// other links is released first.
    pub fn remove_link(&self, name: &str) -> Result<(), BrokerError> {
        let node = self
            .tree
            .remove_link(name)
            .ok_or_else(|| BrokerError::NodeNotFound(format!("{}/{name}", self.tree.downstream().path())))?;
        self.sessions.retain(|_, n| !Arc::ptr_eq(n, &node));
        if let Some(link) = node.as_link() {
            if let Some(client) = link.client() {
                self.release_requests(&node, client);
            }
            let released = link.processor().responder().shutdown();
            self.untrack(node.name(), released);
        }
        self.logger.info("broker", &format!("removed link {}", node.path()));
        Ok(())
    }

    /// Unsubscribe and close everything `client` opened through `node`.
    fn release_requests(&self, node: &BrokerNode, client: ClientId) {
        if let Some(link) = node.as_link() {
            for handle in link.processor().requester().drain() {
                self.close(&handle, client);
            }
        }
    }

    /// Streams on `link` that ended without the requester closing them are
    /// dropped from the requesting link's bookkeeping.
    fn untrack(&self, link: &str, released: Vec<Released>) {
        for entry in released {
            let Some(node) = self.sessions.get(&entry.client).map(|n| n.clone()) else {
                continue;
            };
            if let Some(requester) = node.as_link().map(|l| l.processor().requester()) {
                requester.release(link, &entry);
            }
        }
    }

    /// Process one envelope received from a connected link.
    pub fn handle_message(&self, client: &Arc<dyn Client>, envelope: Envelope) {
        let Some(node) = self.sessions.get(&client.id()).map(|n| n.clone()) else {
            self.logger.warn(
                "broker",
                &format!("dropping message from unknown session {}", client.id()),
            );
            return;
        };
        let Some(link) = node.as_link() else {
            return;
        };

        if !envelope.responses.is_empty() {
            let released = link.processor().responder().dispatch(client.id(), envelope.responses);
            self.untrack(node.name(), released);
        }

        for request in envelope.requests {
            let rid = request.rid;
            if let Err(err) = self.serve(&node, client, request) {
                self.logger
                    .debug("broker", &format!("request {rid} from {} failed: {err}", node.path()));
                client.write_response(vec![Response::error(rid, err.to_error_object())]);
            }
        }
    }

    fn serve(&self, node: &BrokerNode, client: &Arc<dyn Client>, request: Request) -> Result<(), BrokerError> {
        if !client.handshake().is_requester {
            return Err(BrokerError::ProtocolViolation(format!(
                "{} did not announce itself as requester",
                node.path()
            )));
        }
        let Some(link) = node.as_link() else {
            return Ok(());
        };
        let requester = link.processor().requester();
        let rid = request.rid;

        match request.method {
            Method::List => match self.list(required_path(&request)?, client.clone(), rid)? {
                ListReply::Snapshot(response) => client.write_response(vec![response]),
                ListReply::Pending(handle) => requester.track_stream(rid, handle),
            },
            Method::Subscribe => {
                for entry in &request.paths {
                    match self.subscribe(&entry.path, client.clone(), entry.sid) {
                        Ok(Some(handle)) => requester.track_subscription(entry.sid, handle),
                        Ok(None) => {}
                        Err(err) => self.logger.warn(
                            "broker",
                            &format!("subscribe {} from {} failed: {err}", entry.path, node.path()),
                        ),
                    }
                }
                client.write_response(vec![Response::closed(rid)]);
            }
            Method::Unsubscribe => {
                for sid in &request.sids {
                    if let Some(handle) = requester.take_subscription(*sid) {
                        self.unsubscribe(&handle, client.id());
                    }
                }
                client.write_response(vec![Response::closed(rid)]);
            }
            Method::Invoke => {
                let path = required_path(&request)?;
                if let Some(handle) = self.invoke(path, client.clone(), rid, request.params.clone(), request.permit.clone())? {
                    requester.track_stream(rid, handle);
                }
            }
            Method::Set => {
                let path = required_path(&request)?;
                let value = request.value.clone().ok_or_else(|| {
                    BrokerError::ProtocolViolation(format!("set request {rid} has no value"))
                })?;
                if let Some(handle) = self.set(path, client.clone(), rid, value, request.permit.clone())? {
                    requester.track_stream(rid, handle);
                }
            }
            Method::Remove => {
                let path = required_path(&request)?;
                if let Some(handle) = self.remove(path, client.clone(), rid, request.permit.clone())? {
                    requester.track_stream(rid, handle);
                }
            }
            Method::Close => {
                if let Some(handle) = requester.take_stream(rid) {
                    self.close(&handle, client.id());
                }
            }
        }
        Ok(())
    }

    pub fn list(&self, path: &str, requester: Arc<dyn Client>, rid: Rid) -> Result<ListReply, BrokerError> {
        let path = self.tree.parse(path)?;
        self.tree.resolve(&path)?.list(&path, requester, rid)
    }

    pub fn subscribe(&self, path: &str, requester: Arc<dyn Client>, sid: Sid) -> Result<Option<StreamHandle>, BrokerError> {
        let path = self.tree.parse(path)?;
        self.tree.resolve(&path)?.subscribe(&path, requester, sid)
    }

    /// Unknown links and requesters that hold nothing are a no-op.
    pub fn unsubscribe(&self, stream: &StreamHandle, requester: ClientId) {
        if let Some(node) = self.tree.link(&stream.link) {
            node.unsubscribe(stream, requester);
        }
    }

    pub fn invoke(
        &self,
        path: &str,
        requester: Arc<dyn Client>,
        rid: Rid,
        params: Option<Map<String, Value>>,
        permit: Option<String>,
    ) -> Result<Option<StreamHandle>, BrokerError> {
        let path = self.tree.parse(path)?;
        self.tree
            .resolve(&path)?
            .invoke(&path, requester, rid, params, permit)
    }

    pub fn set(
        &self,
        path: &str,
        requester: Arc<dyn Client>,
        rid: Rid,
        value: Value,
        permit: Option<String>,
    ) -> Result<Option<StreamHandle>, BrokerError> {
        let path = self.tree.parse(path)?;
        self.tree
            .resolve(&path)?
            .set(&path, requester, rid, value, permit)
    }

    pub fn remove(
        &self,
        path: &str,
        requester: Arc<dyn Client>,
        rid: Rid,
        permit: Option<String>,
    ) -> Result<Option<StreamHandle>, BrokerError> {
        let path = self.tree.parse(path)?;
        self.tree.resolve(&path)?.remove(&path, requester, rid, permit)
    }

    pub fn close(&self, stream: &StreamHandle, requester: ClientId) {
        if let Some(node) = self.tree.link(&stream.link) {
            node.close(stream, requester);
        }
    }
}

fn required_path(request: &Request) -> Result<&str, BrokerError> {
    request.path.as_deref().ok_or_else(|| {
        BrokerError::ProtocolViolation(format!("{} request {} has no path", request.method, request.rid))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_name_strips_the_key_hash() {
        let hash = "a".repeat(43);
        assert_eq!(link_name(&format!("linkA-{hash}")), "linkA");
        assert_eq!(link_name(&format!("my-link-{hash}")), "my-link");
        assert_eq!(link_name("linkA-short"), "linkA-short");
        assert_eq!(link_name("linkA"), "linkA");
        assert_eq!(link_name(&format!("-{hash}")), format!("-{hash}"));
    }
}
