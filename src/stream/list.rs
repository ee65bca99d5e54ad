use std::collections::{BTreeMap, HashMap};

use link_protocol::{Request, Response, Rid, StreamState};
use serde_json::Value;

use crate::client::ClientId;
use crate::error::BrokerError;

use super::{Released, Waiter};

/// Structural watch on one remote path. Keeps the last-known snapshot so
/// late joiners see the whole node at once.
#[derive(Debug, Clone)]
pub struct ListStream {
    rid: Rid,
    path: String,
    waiters: Vec<Waiter>,
    /// Latest update per entry name, in first-seen order.
    snapshot: Vec<(String, Value)>,
    state: Option<StreamState>,
}

impl ListStream {
    pub fn rid(&self) -> Rid {
        self.rid
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn waiters(&self) -> &[Waiter] {
        &self.waiters
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.snapshot.iter().map(|(_, v)| v.clone()).collect()
    }

    fn apply(&mut self, updates: &[Value]) {
        for update in updates {
            match update {
                Value::Array(items) => {
                    let Some(name) = items.first().and_then(Value::as_str) else {
                        continue;
                    };
                    match self.snapshot.iter_mut().find(|(n, _)| n == name) {
                        Some(entry) => entry.1 = update.clone(),
                        None => self.snapshot.push((name.to_string(), update.clone())),
                    }
                }
                Value::Object(map) => {
                    let removed = map.get("change").and_then(Value::as_str) == Some("remove");
                    if let (true, Some(name)) = (removed, map.get("name").and_then(Value::as_str)) {
                        self.snapshot.retain(|(n, _)| n != name);
                    }
                }
                _ => {}
            }
        }
    }

    fn resend_to(&self, waiter: &Waiter) {
        let state = self.state.unwrap_or(StreamState::Open);
        let response = Response::new(waiter.id, Some(state)).with_updates(self.snapshot());
        waiter.client.write_response(vec![response]);
    }
}

/// What a list call did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listed {
    pub rid: Rid,
    /// First watcher on the path; the caller must list upstream.
    pub created: bool,
}

/// Upstream rid → list stream, plus a path index.
#[derive(Debug, Default)]
pub struct ListTable {
    by_path: HashMap<String, Rid>,
    streams: BTreeMap<Rid, ListStream>,
}

impl ListTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, rid: Rid) -> bool {
        self.streams.contains_key(&rid)
    }

    pub fn get(&self, rid: Rid) -> Option<&ListStream> {
        self.streams.get(&rid)
    }

    pub fn by_path(&self, path: &str) -> Option<&ListStream> {
        self.by_path.get(path).and_then(|rid| self.streams.get(rid))
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Add `waiter` to the stream for `path`. Joining an existing stream
    /// resends the cached snapshot to the newcomer right away.
    /// `next_rid` sees the table so it can skip rids still in use.
    pub fn list(
        &mut self,
        path: &str,
        waiter: Waiter,
        next_rid: impl FnOnce(&Self) -> Rid,
    ) -> Result<Listed, BrokerError> {
        if let Some(rid) = self.by_path.get(path).copied() {
            let stream = self
                .streams
                .get_mut(&rid)
                .ok_or_else(|| BrokerError::ProtocolViolation(format!("list index for `{path}` is stale")))?;
            let requester = waiter.client_id();
            if stream
                .waiters
                .iter()
                .any(|w| w.client_id() == requester && w.id == waiter.id)
            {
                return Err(BrokerError::ProtocolViolation(format!(
                    "rid {} is already listing `{path}`",
                    waiter.id
                )));
            }
            if !stream.snapshot.is_empty() {
                stream.resend_to(&waiter);
            }
            stream.waiters.push(waiter);
            return Ok(Listed { rid, created: false });
        }

        let rid = next_rid(&*self);
        self.by_path.insert(path.to_string(), rid);
        self.streams.insert(
            rid,
            ListStream {
                rid,
                path: path.to_string(),
                waiters: vec![waiter],
                snapshot: Vec::new(),
                state: None,
            },
        );
        Ok(Listed { rid, created: true })
    }

    /// Merge an upstream response into the snapshot and forward it.
    /// `None` when no stream is registered under its rid; otherwise the
    /// watchers a closing response released.
    pub fn dispatch(&mut self, response: &Response) -> Option<Vec<Released>> {
        let stream = self.streams.get_mut(&response.rid)?;
        if let Some(updates) = &response.updates {
            stream.apply(updates);
        }
        if response.stream.is_some() {
            stream.state = response.stream;
        }
        for waiter in &stream.waiters {
            waiter.client.write_response(vec![response.readdressed(waiter.id)]);
        }
        if !response.is_closed() {
            return Some(Vec::new());
        }
        let released = stream.waiters.iter().map(|w| w.released(response.rid)).collect();
        self.remove(response.rid);
        Some(released)
    }

    /// Returns `true` when `client` was the last watcher; the stream is
    /// removed and should be closed upstream.
    pub fn remove_waiter(&mut self, rid: Rid, client: ClientId) -> bool {
        let Some(stream) = self.streams.get_mut(&rid) else {
            return false;
        };
        let before = stream.waiters.len();
        stream.waiters.retain(|w| w.client_id() != client);
        if stream.waiters.len() == before || !stream.waiters.is_empty() {
            return false;
        }
        self.remove(rid);
        true
    }

    /// One fresh list request per stream after a reconnect. Cached
    /// snapshots are dropped since the link will resend everything.
    pub fn reissue(&mut self) -> Vec<Request> {
        self.streams
            .values_mut()
            .map(|stream| {
                stream.snapshot.clear();
                stream.state = None;
                Request::list(stream.rid, stream.path.clone())
            })
            .collect()
    }

    /// Close every stream towards its watchers and empty the table.
    pub fn close_all(&mut self) -> Vec<Released> {
        self.by_path.clear();
        let streams = std::mem::take(&mut self.streams);
        let mut released = Vec::new();
        for stream in streams.values() {
            for waiter in &stream.waiters {
                waiter.client.write_response(vec![Response::closed(waiter.id)]);
                released.push(waiter.released(stream.rid));
            }
        }
        released
    }

    fn remove(&mut self, rid: Rid) {
        if let Some(stream) = self.streams.remove(&rid) {
            self.by_path.remove(&stream.path);
        }
    }
}
