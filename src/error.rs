use link_protocol::{ErrorObject, Rid, Sid};
use thiserror::Error;

/// Errors raised by the broker core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// The raw path could not be normalized.
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A handshake claimed a dsId different from the one reserved on the node.
    #[error("link `{node}` is reserved for dsId `{expected}`, got `{actual}`")]
    IdentityMismatch {
        node: String,
        expected: String,
        actual: String,
    },

    /// The peer did something the protocol does not allow in the current state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The upstream id generator handed out an id that is still in flight.
    #[error("upstream rid {0} is already in flight")]
    DuplicateStream(Rid),

    /// The same requester subscribed twice with the same id.
    #[error("requester already subscribed to `{path}` with id {sid}")]
    DuplicateSubscriber { path: String, sid: Sid },

    #[error("link `{0}` is disconnected")]
    LinkDisconnected(String),

    #[error("node `{0}` not found")]
    NodeNotFound(String),

    #[error("node `{0}` already exists")]
    DuplicateNode(String),

    #[error("node `{0}` is not invokable")]
    NotInvokable(String),

    #[error("`{0}` is not supported on local nodes")]
    Unsupported(String),

    #[error("missing required parameter `{0}`")]
    MissingParameter(String),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Raised while declaring an action, never while invoking it.
    #[error("action misconfigured: {0}")]
    ActionMisconfigured(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("handshake cancelled")]
    HandshakeCancelled,

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> BrokerError {
        BrokerError::Json(err.to_string())
    }
}

impl BrokerError {
    /// Protocol error type string for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::InvalidPath { .. } => "invalidPath",
            BrokerError::NodeNotFound(_) => "invalidPath",
            BrokerError::LinkDisconnected(_) => "disconnected",
            BrokerError::NotInvokable(_) => "permissionDenied",
            BrokerError::MissingParameter(_) | BrokerError::InvalidParameter { .. } => "invalidParameter",
            BrokerError::Unsupported(_) => "notImplemented",
            BrokerError::ProtocolViolation(_) | BrokerError::DuplicateSubscriber { .. } => "invalidRequest",
            _ => "serverError",
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject::new(self.kind(), self.to_string())
    }
}
