use std::collections::BTreeMap;

use link_protocol::{Method, Response, Rid};

use crate::client::ClientId;
use crate::error::BrokerError;

use super::{Released, Waiter};

/// One outstanding invoke, set or remove.
#[derive(Debug, Clone)]
pub struct GenericStream {
    rid: Rid,
    path: String,
    method: Method,
    waiters: Vec<Waiter>,
}

impl GenericStream {
    pub fn new(rid: Rid, path: impl Into<String>, method: Method, waiter: Waiter) -> Self {
        Self {
            rid,
            path: path.into(),
            method,
            waiters: vec![waiter],
        }
    }

    pub fn rid(&self) -> Rid {
        self.rid
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn waiters(&self) -> &[Waiter] {
        &self.waiters
    }

    fn released(&self) -> Vec<Released> {
        self.waiters.iter().map(|w| w.released(self.rid)).collect()
    }

    fn forward(&self, response: &Response) {
        for waiter in &self.waiters {
            waiter.client.write_response(vec![response.readdressed(waiter.id)]);
        }
    }
}

/// Upstream rid → outstanding request.
#[derive(Debug, Default)]
pub struct GenericTable {
    streams: BTreeMap<Rid, GenericStream>,
}

impl GenericTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upstream rids are fresh per call, so a collision means the id
    /// generator is broken.
    pub fn insert_if_absent(&mut self, stream: GenericStream) -> Result<(), BrokerError> {
        if self.streams.contains_key(&stream.rid) {
            return Err(BrokerError::DuplicateStream(stream.rid));
        }
        self.streams.insert(stream.rid, stream);
        Ok(())
    }

    pub fn contains(&self, rid: Rid) -> bool {
        self.streams.contains_key(&rid)
    }

    pub fn get(&self, rid: Rid) -> Option<&GenericStream> {
        self.streams.get(&rid)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Forward an upstream response to the waiters. `None` when no stream is
    /// registered under its rid; otherwise the waiters a terminal response
    /// released.
    pub fn dispatch(&mut self, response: &Response) -> Option<Vec<Released>> {
        let stream = self.streams.get(&response.rid)?;
        stream.forward(response);
        if !response.is_closed() {
            return Some(Vec::new());
        }
        let released = stream.released();
        self.streams.remove(&response.rid);
        Some(released)
    }

    /// Drop every waiter belonging to `client`. Returns `true` when that
    /// emptied the stream, which is then removed and should be closed upstream.
    pub fn remove_waiter(&mut self, rid: Rid, client: ClientId) -> bool {
        let Some(stream) = self.streams.get_mut(&rid) else {
            return false;
        };
        let before = stream.waiters.len();
        stream.waiters.retain(|w| w.client_id() != client);
        if stream.waiters.len() == before || !stream.waiters.is_empty() {
            return false;
        }
        self.streams.remove(&rid);
        true
    }

    /// Fail every outstanding call with `error` and empty the table.
    pub fn purge(&mut self, error: &BrokerError) -> Vec<Released> {
        let object = error.to_error_object();
        let streams = std::mem::take(&mut self.streams);
        let mut released = Vec::new();
        for stream in streams.values() {
            stream.forward(&Response::error(stream.rid, object.clone()));
            released.extend(stream.released());
        }
        released
    }
}
