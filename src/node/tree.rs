use std::sync::Arc;

use crate::error::BrokerError;
use crate::logger::Logger;
use crate::path::ParsedPath;

use super::{BrokerNode, NodeRole, PROFILE_NODE};

/// Root of the namespace plus the node under which links live.
#[derive(Debug)]
pub struct NodeTree {
    root: Arc<BrokerNode>,
    downstream: Arc<BrokerNode>,
    logger: Logger,
}

impl NodeTree {
    pub fn new(downstream: &str, logger: Logger) -> Result<Self, BrokerError> {
        let root = BrokerNode::root();
        let downstream = root.add_child(BrokerNode::new("/", downstream, PROFILE_NODE))?;
        Ok(Self {
            root,
            downstream,
            logger,
        })
    }

    pub fn root(&self) -> &Arc<BrokerNode> {
        &self.root
    }

    pub fn downstream(&self) -> &Arc<BrokerNode> {
        &self.downstream
    }

    pub fn parse(&self, raw: &str) -> Result<ParsedPath, BrokerError> {
        ParsedPath::parse(raw, self.downstream.name())
    }

    /// Node that answers for `path`: the owning link node for remote paths,
    /// the exact node otherwise.
    pub fn resolve(&self, path: &ParsedPath) -> Result<Arc<BrokerNode>, BrokerError> {
        if path.is_remote() {
            return path
                .link()
                .and_then(|name| self.link(name))
                .ok_or_else(|| BrokerError::NodeNotFound(path.full().to_string()));
        }
        let mut node = self.root.clone();
        for segment in path.segments() {
            node = node
                .child(segment)
                .ok_or_else(|| BrokerError::NodeNotFound(path.full().to_string()))?;
        }
        Ok(node)
    }

    pub fn link(&self, name: &str) -> Option<Arc<BrokerNode>> {
        self.downstream.child(name).filter(|n| n.as_link().is_some())
    }

    pub fn get_or_create_link(&self, name: &str) -> Result<Arc<BrokerNode>, BrokerError> {
        let node = self.downstream.get_or_add_child(name, || {
            BrokerNode::new_link(self.downstream.path(), name, None, self.logger.clone())
        });
        match node.role() {
            NodeRole::Link(_) => Ok(node),
            NodeRole::Plain => Err(BrokerError::DuplicateNode(node.path().to_string())),
        }
    }

    pub fn remove_link(&self, name: &str) -> Option<Arc<BrokerNode>> {
        self.link(name)?;
        self.downstream.remove_child(name)
    }
}
