use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use link_protocol::{Rid, Sid};

use crate::stream::{Released, StreamHandle};

#[derive(Debug, Default)]
struct RequesterState {
    subscriptions: HashMap<Sid, StreamHandle>,
    streams: HashMap<Rid, StreamHandle>,
}

/// A link acting as requester: remembers which broker streams its own
/// sids and rids were routed to, so unsubscribe and close can find them.
#[derive(Debug, Default)]
pub struct Requester {
    state: Mutex<RequesterState>,
}

impl Requester {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RequesterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn track_subscription(&self, sid: Sid, handle: StreamHandle) {
        self.state().subscriptions.insert(sid, handle);
    }

    pub fn take_subscription(&self, sid: Sid) -> Option<StreamHandle> {
        self.state().subscriptions.remove(&sid)
    }

    pub fn track_stream(&self, rid: Rid, handle: StreamHandle) {
        self.state().streams.insert(rid, handle);
    }

    pub fn take_stream(&self, rid: Rid) -> Option<StreamHandle> {
        self.state().streams.remove(&rid)
    }

    /// Forget a stream the link on `link` ended on its own. Only the entry
    /// still pointing at that upstream stream is dropped; the rid may have
    /// been reused since.
    pub fn release(&self, link: &str, released: &Released) -> bool {
        let mut state = self.state();
        let current = state
            .streams
            .get(&released.id)
            .is_some_and(|h| h.link == link && h.upstream == released.upstream);
        if current {
            state.streams.remove(&released.id);
        }
        current
    }

    /// Number of subscriptions and streams being tracked.
    pub fn tracked(&self) -> usize {
        let state = self.state();
        state.subscriptions.len() + state.streams.len()
    }

    /// Forget everything, handing back the handles still held.
    pub fn drain(&self) -> Vec<StreamHandle> {
        let mut state = self.state();
        let mut handles: Vec<StreamHandle> = state.subscriptions.drain().map(|(_, h)| h).collect();
        handles.extend(state.streams.drain().map(|(_, h)| h));
        handles
    }
}
