pub mod message;
pub mod types;

pub use message::{Envelope, ErrorObject, Handshake, Request, Response, Rid, SUBSCRIPTION_RID, Sid, SubscribePath};
pub use types::{EditorType, Method, Permission, ResultType, StreamState, ValueType};
