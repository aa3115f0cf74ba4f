//! Client-side watch registry.
//!
//! Multimap from `(kind, path)` to the subscribers waiting on the
//! server-side watch for that key. The server stores at most one watch
//! per `(session, path, kind)`; this registry coalesces every local
//! subscriber onto it, and clears the whole key when it fires because a
//! one-shot fire invalidates every client alias at once.

use crate::models::{WatchKind, WatchSubscriber};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct WatchTable {
    map: HashMap<(WatchKind, String), Vec<WatchSubscriber>>,
}

impl WatchTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber under `(kind, path)`, preserving insertion
    /// order. Returns `true` if this is the first subscriber for the key,
    /// in which case the caller must send the watching opcode variant so
    /// the server installs the watch.
    pub(crate) fn subscribe(
        &mut self,
        kind: WatchKind,
        path: &str,
        subscriber: WatchSubscriber,
    ) -> bool {
        let subs = self.map.entry((kind, path.to_string())).or_default();
        subs.push(subscriber);
        subs.len() == 1
    }

    /// Remove and return every subscriber for `(kind, path)`. A fired
    /// server watch is gone; the key must disappear with the dispatch.
    pub(crate) fn take(&mut self, kind: WatchKind, path: &str) -> Vec<WatchSubscriber> {
        self.map
            .remove(&(kind, path.to_string()))
            .unwrap_or_default()
    }

    /// Drain the whole registry for session-death notification.
    pub(crate) fn drain(
        &mut self,
    ) -> impl Iterator<Item = ((WatchKind, String), Vec<WatchSubscriber>)> + '_ {
        self.map.drain()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
