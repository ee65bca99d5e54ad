use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use link_protocol::{Method, Request, Response, Rid, SUBSCRIPTION_RID, Sid, SubscribePath};
use serde_json::{Map, Value};

use crate::client::{Client, ClientId};
use crate::error::BrokerError;
use crate::logger::Logger;
use crate::stream::generic::{GenericStream, GenericTable};
use crate::stream::list::ListTable;
use crate::stream::sub::SubTable;
use crate::stream::{Released, StreamHandle, Waiter};

struct ResponderState {
    client: Option<Arc<dyn Client>>,
    next_rid: Rid,
    next_sid: Sid,
    generic: GenericTable,
    subs: SubTable,
    lists: ListTable,
    /// Rids of our own subscribe/unsubscribe requests awaiting their ack.
    control: HashSet<Rid>,
}

/// Next rid from `counter` that `in_use` does not claim.
fn bump_rid(counter: &mut Rid, in_use: impl Fn(Rid) -> bool) -> Rid {
    loop {
        let rid = *counter;
        // rid 0 belongs to subscription updates
        *counter = counter.checked_add(1).unwrap_or(1);
        if !in_use(rid) {
            return rid;
        }
    }
}

fn bump_sid(counter: &mut Sid, in_use: impl Fn(Sid) -> bool) -> Sid {
    loop {
        let sid = *counter;
        *counter = counter.wrapping_add(1);
        if !in_use(sid) {
            return sid;
        }
    }
}

impl ResponderState {
    fn take_rid(&mut self) -> Rid {
        let Self {
            next_rid,
            generic,
            lists,
            control,
            ..
        } = self;
        bump_rid(next_rid, |rid| {
            generic.contains(rid) || lists.contains(rid) || control.contains(&rid)
        })
    }

    fn send(&self, requests: Vec<Request>) {
        if let Some(client) = &self.client {
            client.write_request(requests);
        }
    }

    fn control_request(&mut self, build: impl FnOnce(Rid) -> Request) -> Option<Request> {
        self.client.as_ref()?;
        let rid = self.take_rid();
        self.control.insert(rid);
        Some(build(rid))
    }
}

/// The broker acting as requester towards one link's responder.
///
/// All tables and id counters of the link sit behind a single lock, so
/// every operation on one link is serialized while links stay independent.
pub struct Responder {
    link: String,
    logger: Logger,
    state: Mutex<ResponderState>,
}

impl Responder {
    pub fn new(link: impl Into<String>, logger: Logger) -> Self {
        Self {
            link: link.into(),
            logger,
            state: Mutex::new(ResponderState {
                client: None,
                next_rid: 1,
                next_sid: 0,
                generic: GenericTable::new(),
                subs: SubTable::new(),
                lists: ListTable::new(),
                control: HashSet::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ResponderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn is_connected(&self) -> bool {
        self.state().client.is_some()
    }

    pub fn current_client(&self) -> Option<ClientId> {
        self.state().client.as_ref().map(|c| c.id())
    }

    /// Attach a live connection and replay every standing subscription and
    /// list stream on it.
    pub fn attach(&self, client: Arc<dyn Client>) -> Result<(), BrokerError> {
        let mut state = self.state();
        if state.client.is_some() {
            return Err(BrokerError::ProtocolViolation(format!(
                "link `{}` already has a live connection",
                self.link
            )));
        }
        state.client = Some(client);

        let mut replay = Vec::new();
        let paths = state.subs.paths();
        if !paths.is_empty() {
            replay.extend(state.control_request(|rid| Request::subscribe(rid, paths)));
        }
        replay.extend(state.lists.reissue());
        if !replay.is_empty() {
            self.logger.debug(
                "responder",
                &format!("replaying {} request(s) on `{}`", replay.len(), self.link),
            );
        }
        state.send(replay);
        Ok(())
    }

    /// Detach `client` if it is the current connection. Outstanding
    /// invoke/set/remove calls fail; subscriptions and lists wait for the
    /// next attach.
    ///
    /// Returns `None` for a client that is not the current one, otherwise
    /// the waiters of the failed calls.
    pub fn detach(&self, client: ClientId) -> Option<Vec<Released>> {
        let mut state = self.state();
        if state.client.as_ref().map(|c| c.id()) != Some(client) {
            return None;
        }
        state.client = None;
        state.control.clear();
        let purged = state
            .generic
            .purge(&BrokerError::LinkDisconnected(self.link.clone()));
        if !purged.is_empty() {
            self.logger.info(
                "responder",
                &format!("failed {} outstanding request(s) on `{}`", purged.len(), self.link),
            );
        }
        Some(purged)
    }

    /// Register a structural watch on `path`. While detached the upstream
    /// request waits for the next attach.
    pub fn list(&self, path: &str, waiter: Waiter) -> Result<StreamHandle, BrokerError> {
        let mut guard = self.state();
        let state = &mut *guard;
        let (next_rid, generic, control) = (&mut state.next_rid, &state.generic, &state.control);
        let listed = state.lists.list(path, waiter, |lists| {
            bump_rid(next_rid, |rid| {
                lists.contains(rid) || generic.contains(rid) || control.contains(&rid)
            })
        })?;
        if listed.created {
            state.send(vec![Request::list(listed.rid, path)]);
        }
        Ok(StreamHandle::new(&self.link, path, Method::List, listed.rid))
    }

    pub fn subscribe(&self, path: &str, waiter: Waiter) -> Result<StreamHandle, BrokerError> {
        let mut guard = self.state();
        let state = &mut *guard;
        let next_sid = &mut state.next_sid;
        let subscribed = state
            .subs
            .subscribe(path, waiter, |subs| bump_sid(next_sid, |sid| subs.get(sid).is_some()))?;
        if subscribed.created {
            let paths = vec![SubscribePath::new(path, subscribed.sid)];
            if let Some(request) = state.control_request(|rid| Request::subscribe(rid, paths)) {
                state.send(vec![request]);
            }
        }
        Ok(StreamHandle::new(&self.link, path, Method::Subscribe, subscribed.sid))
    }

    /// Remove every entry of `requester` on the subscription; the last one
    /// out unsubscribes upstream.
    pub fn unsubscribe(&self, sid: Sid, requester: ClientId) {
        let mut state = self.state();
        if state.subs.unsubscribe(sid, requester) {
            if let Some(request) = state.control_request(|rid| Request::unsubscribe(rid, vec![sid])) {
                state.send(vec![request]);
            }
        }
    }

    pub fn invoke(
        &self,
        path: &str,
        waiter: Waiter,
        params: Option<Map<String, Value>>,
        permit: Option<String>,
    ) -> Result<StreamHandle, BrokerError> {
        self.call(path, waiter, Method::Invoke, |rid| {
            Request::invoke(rid, path, params).with_permit(permit)
        })
    }

    pub fn set(&self, path: &str, waiter: Waiter, value: Value, permit: Option<String>) -> Result<StreamHandle, BrokerError> {
        self.call(path, waiter, Method::Set, |rid| {
            Request::set(rid, path, value).with_permit(permit)
        })
    }

    pub fn remove(&self, path: &str, waiter: Waiter, permit: Option<String>) -> Result<StreamHandle, BrokerError> {
        self.call(path, waiter, Method::Remove, |rid| {
            Request::remove(rid, path).with_permit(permit)
        })
    }

    /// Every call gets its own upstream rid, even when an identical call is
    /// already in flight.
    fn call(
        &self,
        path: &str,
        waiter: Waiter,
        method: Method,
        build: impl FnOnce(Rid) -> Request,
    ) -> Result<StreamHandle, BrokerError> {
        let mut state = self.state();
        if state.client.is_none() {
            return Err(BrokerError::LinkDisconnected(self.link.clone()));
        }
        let rid = state.take_rid();
        state
            .generic
            .insert_if_absent(GenericStream::new(rid, path, method, waiter))?;
        state.send(vec![build(rid)]);
        Ok(StreamHandle::new(&self.link, path, method, rid))
    }

    /// Release whatever `requester` holds on the stream behind `handle`.
    pub fn close(&self, handle: &StreamHandle, requester: ClientId) {
        if handle.method == Method::Subscribe {
            self.unsubscribe(handle.upstream, requester);
            return;
        }
        let mut state = self.state();
        let emptied = match handle.method {
            Method::List => state.lists.remove_waiter(handle.upstream, requester),
            _ => state.generic.remove_waiter(handle.upstream, requester),
        };
        if emptied {
            state.send(vec![Request::close(handle.upstream)]);
        }
    }

    /// Route responses that arrived from the link. Traffic from anything but
    /// the current connection is dropped. Returns the waiters whose streams
    /// the link closed.
    pub fn dispatch(&self, from: ClientId, responses: Vec<Response>) -> Vec<Released> {
        let mut state = self.state();
        let mut released = Vec::new();
        if state.client.as_ref().map(|c| c.id()) != Some(from) {
            self.logger.warn(
                "responder",
                &format!("dropping {} response(s) from stale session {from} on `{}`", responses.len(), self.link),
            );
            return released;
        }
        for response in responses {
            if response.rid == SUBSCRIPTION_RID {
                let updates = response.updates.unwrap_or_default();
                let unmatched = state.subs.dispatch(&updates);
                if !unmatched.is_empty() {
                    self.logger.warn(
                        "subscription",
                        &format!("dropping {} update(s) for unknown sid on `{}`", unmatched.len(), self.link),
                    );
                }
            } else if let Some(closed) = state.generic.dispatch(&response) {
                released.extend(closed);
            } else if let Some(closed) = state.lists.dispatch(&response) {
                released.extend(closed);
            } else if state.control.remove(&response.rid) {
                if let Some(error) = &response.error {
                    self.logger.warn(
                        "subscription",
                        &format!("`{}` rejected request {}: {}", self.link, response.rid, error.msg),
                    );
                }
            } else {
                self.logger.warn(
                    "responder",
                    &format!("dropping stale response for rid {} on `{}`", response.rid, self.link),
                );
            }
        }
        released
    }

    /// Tear everything down for good: calls fail, lists close, subscriptions
    /// are forgotten.
    pub fn shutdown(&self) -> Vec<Released> {
        let mut state = self.state();
        let mut released = state.generic.purge(&BrokerError::NodeNotFound(self.link.clone()));
        released.extend(state.lists.close_all());
        state.subs.drain();
        state.control.clear();
        state.client = None;
        released
    }

    pub fn stats(&self) -> ResponderStats {
        let state = self.state();
        ResponderStats {
            generic: state.generic.len(),
            subscriptions: state.subs.len(),
            lists: state.lists.len(),
        }
    }
}

/// Table sizes, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponderStats {
    pub generic: usize,
    pub subscriptions: usize,
    pub lists: usize,
}
