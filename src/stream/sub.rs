use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use link_protocol::{Response, Sid, SubscribePath};
use serde_json::Value;

use crate::client::{Client, ClientId};
use crate::error::BrokerError;

use super::Waiter;

/// Long-lived value subscription on one remote path.
#[derive(Debug, Clone)]
pub struct SubStream {
    path: String,
    sid: Sid,
    waiters: Vec<Waiter>,
}

impl SubStream {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub fn waiters(&self) -> &[Waiter] {
        &self.waiters
    }
}

/// What a subscribe call did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscribed {
    pub sid: Sid,
    /// First subscriber on the path; the caller must subscribe upstream.
    pub created: bool,
}

/// Upstream sid → subscription, plus a path index.
#[derive(Debug, Default)]
pub struct SubTable {
    by_path: HashMap<String, Sid>,
    streams: BTreeMap<Sid, SubStream>,
}

impl SubTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn get(&self, sid: Sid) -> Option<&SubStream> {
        self.streams.get(&sid)
    }

    pub fn by_path(&self, path: &str) -> Option<&SubStream> {
        self.by_path.get(path).and_then(|sid| self.streams.get(sid))
    }

    /// Add `waiter` to the stream for `path`, creating it with `next_sid()`
    /// when nobody watches the path yet.
    pub fn subscribe(
        &mut self,
        path: &str,
        waiter: Waiter,
        next_sid: impl FnOnce(&Self) -> Sid,
    ) -> Result<Subscribed, BrokerError> {
        if let Some(sid) = self.by_path.get(path).copied() {
            let stream = self
                .streams
                .get_mut(&sid)
                .ok_or_else(|| BrokerError::ProtocolViolation(format!("subscription index for `{path}` is stale")))?;
            let requester = waiter.client_id();
            if stream
                .waiters
                .iter()
                .any(|w| w.client_id() == requester && w.id == waiter.id)
            {
                return Err(BrokerError::DuplicateSubscriber {
                    path: path.to_string(),
                    sid: waiter.id,
                });
            }
            stream.waiters.push(waiter);
            return Ok(Subscribed { sid, created: false });
        }

        let sid = next_sid(&*self);
        self.by_path.insert(path.to_string(), sid);
        self.streams.insert(
            sid,
            SubStream {
                path: path.to_string(),
                sid,
                waiters: vec![waiter],
            },
        );
        Ok(Subscribed { sid, created: true })
    }

    /// Remove every entry `client` holds on stream `sid`. Returns `true`
    /// when the stream emptied and was dropped, so the caller must
    /// unsubscribe upstream. A client that was not subscribed is a no-op.
    pub fn unsubscribe(&mut self, sid: Sid, client: ClientId) -> bool {
        let Some(stream) = self.streams.get_mut(&sid) else {
            return false;
        };
        let before = stream.waiters.len();
        stream.waiters.retain(|w| w.client_id() != client);
        if stream.waiters.len() == before || !stream.waiters.is_empty() {
            return false;
        }
        if let Some(stream) = self.streams.remove(&sid) {
            self.by_path.remove(&stream.path);
        }
        true
    }

    /// Everything to re-subscribe after a reconnect, oldest first.
    pub fn paths(&self) -> Vec<SubscribePath> {
        self.streams
            .values()
            .map(|s| SubscribePath::new(s.path.clone(), s.sid))
            .collect()
    }

    /// Fan rid-0 updates out to each waiter under its own sid. Updates are
    /// batched per requester in subscription order. Returns the updates no
    /// stream claimed.
    pub fn dispatch(&self, updates: &[Value]) -> Vec<Value> {
        let mut batches: Vec<(ClientId, Arc<dyn Client>, Vec<Value>)> = Vec::new();
        let mut unmatched = Vec::new();

        for update in updates {
            let stream = update_sid(update).and_then(|sid| self.streams.get(&sid));
            let Some(stream) = stream else {
                unmatched.push(update.clone());
                continue;
            };
            for waiter in &stream.waiters {
                let value = with_sid(update, waiter.id);
                let id = waiter.client_id();
                match batches.iter_mut().find(|(c, _, _)| *c == id) {
                    Some((_, _, batch)) => batch.push(value),
                    None => batches.push((id, waiter.client.clone(), vec![value])),
                }
            }
        }

        for (_, client, batch) in batches {
            client.write_response(vec![Response::subscription_updates(batch)]);
        }
        unmatched
    }

    /// Remove every stream, e.g. when the link goes away for good.
    pub fn drain(&mut self) -> Vec<SubStream> {
        self.by_path.clear();
        std::mem::take(&mut self.streams).into_values().collect()
    }
}

fn update_sid(update: &Value) -> Option<Sid> {
    let raw = match update {
        Value::Array(items) => items.first()?,
        Value::Object(map) => map.get("sid")?,
        _ => return None,
    };
    raw.as_u64().and_then(|sid| Sid::try_from(sid).ok())
}

fn with_sid(update: &Value, sid: Sid) -> Value {
    let mut out = update.clone();
    match &mut out {
        Value::Array(items) => {
            if let Some(first) = items.first_mut() {
                *first = Value::from(sid);
            }
        }
        Value::Object(map) => {
            map.insert("sid".into(), Value::from(sid));
        }
        _ => {}
    }
    out
}
