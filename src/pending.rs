//! In-flight request correlation.
//!
//! Maps each outgoing xid to the completion that must receive the
//! matching reply. The auth slot is a dedicated field rather than a map
//! entry so its single-outstanding discipline is carried by the type.

use crate::error::{Result, ZkLinkError};
use crate::models::{CastReply, Opcode, Reply};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

/// How a reply is delivered back to its originator.
#[derive(Debug)]
pub(crate) enum Completion {
    /// The caller is suspended on a oneshot awaiting the reply.
    Blocking(oneshot::Sender<Result<Reply>>),
    /// The reply is delivered as a tagged message; the submitter never
    /// blocks on it.
    NonBlocking {
        tx: mpsc::Sender<CastReply>,
        tag: u64,
    },
}

impl Completion {
    /// Deliver a result to the originator. Never suspends: non-blocking
    /// receivers that are full or gone simply miss the message.
    pub(crate) fn deliver(self, result: Result<Reply>) {
        match self {
            Self::Blocking(tx) => {
                let _ = tx.send(result);
            },
            Self::NonBlocking { tx, tag } => {
                if tx.try_send(CastReply { tag, result }).is_err() {
                    log::debug!("[zk-link] cast receiver for tag {} is gone or full", tag);
                }
            },
        }
    }
}

/// One in-flight request.
#[derive(Debug)]
pub(crate) struct PendingEntry {
    pub opcode: Opcode,
    pub path: String,
    pub completion: Completion,
}

/// The pending-request table plus the dedicated auth slot.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    entries: HashMap<i32, PendingEntry>,
    auth: Option<oneshot::Sender<Result<Reply>>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record an in-flight request. xids are never reused within a
    /// session, so a collision is a caller bug.
    pub(crate) fn insert(&mut self, xid: i32, entry: PendingEntry) {
        debug_assert!(!self.entries.contains_key(&xid), "xid {} reused", xid);
        self.entries.insert(xid, entry);
    }

    pub(crate) fn remove(&mut self, xid: i32) -> Option<PendingEntry> {
        self.entries.remove(&xid)
    }

    /// Whether an auth request is already outstanding.
    pub(crate) fn auth_in_progress(&self) -> bool {
        self.auth.is_some()
    }

    /// Occupy the auth slot. Panics in debug builds if already occupied;
    /// callers check [`auth_in_progress`](Self::auth_in_progress) first.
    pub(crate) fn set_auth(&mut self, tx: oneshot::Sender<Result<Reply>>) {
        debug_assert!(self.auth.is_none());
        self.auth = Some(tx);
    }

    pub(crate) fn take_auth(&mut self) -> Option<oneshot::Sender<Result<Reply>>> {
        self.auth.take()
    }

    /// Fail every outstanding completion, the auth slot included. Leaves
    /// the table empty.
    pub(crate) fn fail_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            let failure = ZkLinkError::ClientBroke {
                opcode: entry.opcode,
                path: entry.path,
            };
            entry.completion.deliver(Err(failure));
        }
        if let Some(tx) = self.auth.take() {
            let _ = tx.send(Err(ZkLinkError::ClientBroke {
                opcode: Opcode::Auth,
                path: String::new(),
            }));
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
