//! The broker's namespace. Every node is one [`BrokerNode`] record; nodes
//! that stand for a connected link carry a [`LinkNode`] role.

pub mod link;
pub mod tree;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use link_protocol::{Method, Response, Rid, Sid};
use serde_json::{Map, Value, json};

use crate::action::{Action, ActionResult, InvokeMode};
use crate::client::{Client, ClientId};
use crate::error::BrokerError;
use crate::path::ParsedPath;
use crate::stream::{StreamHandle, Waiter};

pub use link::LinkNode;
pub use tree::NodeTree;

pub const PROFILE_NODE: &str = "node";
pub const PROFILE_LINK: &str = "dsa/link";

pub enum NodeRole {
    Plain,
    Link(LinkNode),
}

/// Outcome of a list call.
#[derive(Debug, Clone, PartialEq)]
pub enum ListReply {
    /// Local node: the structural snapshot, ready to send.
    Snapshot(Response),
    /// Remote node: updates will arrive on the requester's rid.
    Pending(StreamHandle),
}

pub struct BrokerNode {
    name: String,
    path: String,
    profile: String,
    accessible: AtomicBool,
    attributes: DashMap<String, Value>,
    children: DashMap<String, Arc<BrokerNode>>,
    action: RwLock<Option<Arc<Action>>>,
    role: NodeRole,
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

impl BrokerNode {
    fn with_role(parent: Option<&str>, name: &str, profile: &str, role: NodeRole) -> Self {
        Self {
            name: name.to_string(),
            path: parent.map(|p| child_path(p, name)).unwrap_or_else(|| "/".to_string()),
            profile: profile.to_string(),
            accessible: AtomicBool::new(true),
            attributes: DashMap::new(),
            children: DashMap::new(),
            action: RwLock::new(None),
            role,
        }
    }

    pub fn root() -> Arc<Self> {
        Arc::new(Self::with_role(None, "", PROFILE_NODE, NodeRole::Plain))
    }

    /// A plain node to be added under `parent`.
    pub fn new(parent: &str, name: &str, profile: &str) -> Self {
        Self::with_role(Some(parent), name, profile, NodeRole::Plain)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn role(&self) -> &NodeRole {
        &self.role
    }

    pub fn is_accessible(&self) -> bool {
        self.accessible.load(Ordering::Acquire)
    }

    pub fn set_accessible(&self, accessible: bool) {
        self.accessible.store(accessible, Ordering::Release);
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.get(key).map(|v| v.clone())
    }

    pub fn set_action(&self, action: Option<Action>) {
        let mut slot = self.action.write().unwrap_or_else(PoisonError::into_inner);
        *slot = action.map(Arc::new);
    }

    pub fn action(&self) -> Option<Arc<Action>> {
        self.action
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn child(&self, name: &str) -> Option<Arc<BrokerNode>> {
        self.children.get(name).map(|c| c.clone())
    }

    /// Children sorted by name.
    pub fn children(&self) -> Vec<Arc<BrokerNode>> {
        let mut children: Vec<_> = self.children.iter().map(|c| c.value().clone()).collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children
    }

    pub fn add_child(&self, child: BrokerNode) -> Result<Arc<BrokerNode>, BrokerError> {
        match self.children.entry(child.name.clone()) {
            Entry::Occupied(_) => Err(BrokerError::DuplicateNode(child.path)),
            Entry::Vacant(slot) => Ok(slot.insert(Arc::new(child)).clone()),
        }
    }

    /// Existing child called `name`, or the one `make` builds.
    pub fn get_or_add_child(&self, name: &str, make: impl FnOnce() -> BrokerNode) -> Arc<BrokerNode> {
        self.children
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(make()))
            .clone()
    }

    pub fn remove_child(&self, name: &str) -> Option<Arc<BrokerNode>> {
        self.children.remove(name).map(|(_, c)| c)
    }

    /// Structural snapshot in list-update form: `$is`, attributes, action
    /// metadata, link state, then accessible children by name.
    pub fn snapshot(&self) -> Vec<Value> {
        let mut updates = vec![json!(["$is", self.profile])];

        let mut attributes: Vec<(String, Value)> = self
            .attributes
            .iter()
            .map(|a| (a.key().clone(), a.value().clone()))
            .collect();
        attributes.sort_by(|a, b| a.0.cmp(&b.0));
        updates.extend(attributes.into_iter().map(|(k, v)| json!([k, v])));

        if let Some(action) = self.action().filter(|a| !a.is_hidden()) {
            updates.push(json!(["$invokable", action.permission().as_ref()]));
            updates.push(json!(["$params", action.params_json()]));
            updates.push(json!(["$columns", action.columns_json()]));
            updates.push(json!(["$result", action.result_type().as_ref()]));
        }

        if let NodeRole::Link(link) = &self.role {
            link.append_state(&mut updates);
        }

        for child in self.children().into_iter().filter(|c| c.is_accessible()) {
            updates.push(json!([child.name, child.summary()]));
        }
        updates
    }

    fn summary(&self) -> Value {
        let mut summary = Map::new();
        summary.insert("$is".into(), json!(self.profile));
        if let Some(action) = self.action().filter(|a| !a.is_hidden()) {
            summary.insert("$invokable".into(), json!(action.permission().as_ref()));
        }
        if let NodeRole::Link(link) = &self.role {
            if let Some(data) = link.link_data() {
                summary.insert("linkData".into(), data);
            }
        }
        Value::Object(summary)
    }

    fn link_for(&self, path: &ParsedPath) -> Result<&LinkNode, BrokerError> {
        match &self.role {
            // requester-only links have nothing to answer with
            NodeRole::Link(link) if self.is_accessible() => Ok(link),
            _ => Err(BrokerError::NodeNotFound(path.full().to_string())),
        }
    }

    pub fn list(&self, path: &ParsedPath, requester: Arc<dyn Client>, rid: Rid) -> Result<ListReply, BrokerError> {
        if path.is_remote() {
            let responder = self.link_for(path)?.processor().responder();
            return responder
                .list(path.base(), Waiter::new(requester, rid))
                .map(ListReply::Pending);
        }
        Ok(ListReply::Snapshot(Response::open(rid, self.snapshot())))
    }

    /// Local value subscriptions are not served here and yield `None`.
    pub fn subscribe(
        &self,
        path: &ParsedPath,
        requester: Arc<dyn Client>,
        sid: Sid,
    ) -> Result<Option<StreamHandle>, BrokerError> {
        if !path.is_remote() {
            return Ok(None);
        }
        let responder = self.link_for(path)?.processor().responder();
        responder.subscribe(path.base(), Waiter::new(requester, sid)).map(Some)
    }

    /// Handles of other stream kinds are ignored; those are released
    /// through [`close`](Self::close).
    pub fn unsubscribe(&self, stream: &StreamHandle, requester: ClientId) {
        if stream.method != Method::Subscribe {
            return;
        }
        if let NodeRole::Link(link) = &self.role {
            link.processor().responder().unsubscribe(stream.upstream, requester);
        }
    }

    /// Release `requester`'s hold on any stream kind.
    pub fn close(&self, stream: &StreamHandle, requester: ClientId) {
        if let NodeRole::Link(link) = &self.role {
            link.processor().responder().close(stream, requester);
        }
    }

    /// Remote paths are forwarded upstream and return the stream handle.
    /// Local nodes run their action and answer `requester` directly.
    pub fn invoke(
        &self,
        path: &ParsedPath,
        requester: Arc<dyn Client>,
        rid: Rid,
        params: Option<Map<String, Value>>,
        permit: Option<String>,
    ) -> Result<Option<StreamHandle>, BrokerError> {
        if path.is_remote() {
            let responder = self.link_for(path)?.processor().responder();
            return responder
                .invoke(path.base(), Waiter::new(requester, rid), params, permit)
                .map(Some);
        }
        let action = self
            .action()
            .ok_or_else(|| BrokerError::NotInvokable(path.full().to_string()))?;
        self.run_action(action, requester, rid, params.unwrap_or_default());
        Ok(None)
    }

    pub fn set(
        &self,
        path: &ParsedPath,
        requester: Arc<dyn Client>,
        rid: Rid,
        value: Value,
        permit: Option<String>,
    ) -> Result<Option<StreamHandle>, BrokerError> {
        if !path.is_remote() {
            return Err(BrokerError::Unsupported("set".into()));
        }
        let responder = self.link_for(path)?.processor().responder();
        responder
            .set(path.base(), Waiter::new(requester, rid), value, permit)
            .map(Some)
    }

    pub fn remove(
        &self,
        path: &ParsedPath,
        requester: Arc<dyn Client>,
        rid: Rid,
        permit: Option<String>,
    ) -> Result<Option<StreamHandle>, BrokerError> {
        if !path.is_remote() {
            return Err(BrokerError::Unsupported("remove".into()));
        }
        let responder = self.link_for(path)?.processor().responder();
        responder
            .remove(path.base(), Waiter::new(requester, rid), permit)
            .map(Some)
    }

    fn run_action(&self, action: Arc<Action>, requester: Arc<dyn Client>, rid: Rid, params: Map<String, Value>) {
        let mode = action.invoke_mode();
        let node = self.path.clone();
        let job = move || {
            let mut result = ActionResult::new(node, params);
            let response = match action.invoke(&mut result) {
                Ok(()) => result.into_response(rid, action.columns_json()),
                Err(err) => Response::error(rid, err.to_error_object()),
            };
            requester.write_response(vec![response]);
        };

        match (mode, tokio::runtime::Handle::try_current()) {
            (InvokeMode::Async, Ok(runtime)) => {
                runtime.spawn(async move { job() });
            }
            _ => job(),
        }
    }
}

impl std::fmt::Debug for BrokerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerNode")
            .field("path", &self.path)
            .field("profile", &self.profile)
            .field("accessible", &self.is_accessible())
            .field("children", &self.children.len())
            .finish()
    }
}
