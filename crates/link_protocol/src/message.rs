use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::types::{Method, StreamState};

/// Core request/response objects exchanged between the broker and links.
///
/// They are transport-agnostic: whatever carries the bytes (WebSocket,
/// stdio, an in-memory channel) hands these over already parsed.
///
/// ```ignore
/// use link_protocol::{Request, Response};
/// use serde_json::json;
///
/// let req = Request::set(3, "/sensor/setpoint", json!(21.5));
/// let rsp = Response::closed(3);
/// ```
pub type Rid = u32;
pub type Sid = u32;

/// Request id reserved for subscription value updates.
pub const SUBSCRIPTION_RID: Rid = 0;

/// One entry of a `subscribe` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SubscribePath {
    pub path: String,
    pub sid: Sid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<u8>,
}

impl SubscribePath {
    pub fn new(path: impl Into<String>, sid: Sid) -> Self {
        Self {
            path: path.into(),
            sid,
            qos: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Request {
    pub rid: Rid,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// `subscribe` only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<SubscribePath>,
    /// `unsubscribe` only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sids: Vec<Sid>,
    /// `invoke` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    /// `set` only. `None` when the field is absent; an explicit `null`
    /// arrives as `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permit: Option<String>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Error object attached to a closed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorObject {
    pub fn new(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            msg: msg.into(),
            detail: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Response {
    pub rid: Rid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// One frame of link traffic. Either list may be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<Request>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<Response>,
}

/// What the transport learned about a link while establishing its session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub ds_id: String,
    #[serde(default)]
    pub is_requester: bool,
    #[serde(default)]
    pub is_responder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_data: Option<Value>,
}

impl Handshake {
    pub fn new(ds_id: impl Into<String>, is_requester: bool, is_responder: bool) -> Self {
        Self {
            ds_id: ds_id.into(),
            is_requester,
            is_responder,
            link_data: None,
        }
    }

    pub fn with_link_data(mut self, link_data: Value) -> Self {
        self.link_data = Some(link_data);
        self
    }
}

// -----------------------------------------------------------------------------
// Helper constructors
// -----------------------------------------------------------------------------
impl Request {
    fn bare(rid: Rid, method: Method) -> Self {
        Self {
            rid,
            method,
            path: None,
            paths: Vec::new(),
            sids: Vec::new(),
            params: None,
            value: None,
            permit: None,
        }
    }

    pub fn list(rid: Rid, path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::bare(rid, Method::List)
        }
    }

    pub fn subscribe(rid: Rid, paths: Vec<SubscribePath>) -> Self {
        Self {
            paths,
            ..Self::bare(rid, Method::Subscribe)
        }
    }

    pub fn unsubscribe(rid: Rid, sids: Vec<Sid>) -> Self {
        Self {
            sids,
            ..Self::bare(rid, Method::Unsubscribe)
        }
    }

    pub fn invoke(rid: Rid, path: impl Into<String>, params: Option<Map<String, Value>>) -> Self {
        Self {
            path: Some(path.into()),
            params,
            ..Self::bare(rid, Method::Invoke)
        }
    }

    pub fn set(rid: Rid, path: impl Into<String>, value: Value) -> Self {
        Self {
            path: Some(path.into()),
            value: Some(value),
            ..Self::bare(rid, Method::Set)
        }
    }

    pub fn remove(rid: Rid, path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::bare(rid, Method::Remove)
        }
    }

    pub fn close(rid: Rid) -> Self {
        Self::bare(rid, Method::Close)
    }

    pub fn with_permit(mut self, permit: Option<String>) -> Self {
        self.permit = permit;
        self
    }
}

impl Response {
    pub fn new(rid: Rid, stream: Option<StreamState>) -> Self {
        Self {
            rid,
            stream,
            updates: None,
            columns: None,
            meta: None,
            error: None,
        }
    }

    pub fn open(rid: Rid, updates: Vec<Value>) -> Self {
        Self {
            updates: Some(updates),
            ..Self::new(rid, Some(StreamState::Open))
        }
    }

    pub fn closed(rid: Rid) -> Self {
        Self::new(rid, Some(StreamState::Closed))
    }

    /// Terminal response carrying an error.
    pub fn error(rid: Rid, error: ErrorObject) -> Self {
        Self {
            error: Some(error),
            ..Self::closed(rid)
        }
    }

    /// Value updates for subscription streams, always on rid 0.
    pub fn subscription_updates(updates: Vec<Value>) -> Self {
        Self {
            updates: Some(updates),
            ..Self::new(SUBSCRIPTION_RID, None)
        }
    }

    pub fn with_updates(mut self, updates: Vec<Value>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn with_columns(mut self, columns: Vec<Value>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.stream == Some(StreamState::Closed)
    }

    /// Same payload re-addressed to another request id.
    pub fn readdressed(&self, rid: Rid) -> Self {
        Self {
            rid,
            ..self.clone()
        }
    }
}
