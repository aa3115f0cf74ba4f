//! Public handle to a single-session connection engine.
//!
//! A [`Session`] is a cheap-to-clone set of senders into the engine task
//! spawned by [`Session::connect`]. All state lives in the engine; the
//! handle only shapes requests and awaits completions.

use crate::connection::{Engine, EngineCmd, CMD_CHANNEL_CAPACITY};
use crate::error::{Result, ZkLinkError};
use crate::models::{
    Acl, CastReply, CreateMode, Op, Reply, ServerSpec, Stat, WatchOp, WatchSubscriber,
};
use crate::pending::Completion;
use crate::timeouts::ZkLinkTimeouts;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A live client session.
///
/// Blocking methods suspend the caller until the matching reply is
/// routed back; [`cast`](Session::cast) submits without waiting and the
/// reply arrives as a tagged [`CastReply`]. The session has no
/// reconnection: once the engine dies every method returns
/// [`ZkLinkError::SessionClosed`] and a replacement session must be
/// connected.
///
/// # Examples
///
/// ```rust,no_run
/// use zk_link::{Acl, CreateMode, ServerSpec, Session};
///
/// # async fn example() -> zk_link::Result<()> {
/// let session = Session::connect(&[ServerSpec::new("127.0.0.1", 2181, 30000)]).await?;
///
/// session
///     .create("/a", b"x".to_vec(), CreateMode::Persistent, vec![Acl::world_anyone_all()])
///     .await?;
/// let (data, _stat) = session.get("/a").await?;
/// assert_eq!(data, b"x");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Session {
    cmd_tx: mpsc::Sender<EngineCmd>,
    connected: Arc<AtomicBool>,
    session_id: i64,
    negotiated_timeout_ms: u64,
}

impl Session {
    /// Connect with default timeouts.
    pub async fn connect(servers: &[ServerSpec]) -> Result<Self> {
        Self::connect_with(servers, ZkLinkTimeouts::default()).await
    }

    /// Connect to one server picked uniformly at random from `servers`,
    /// perform the session handshake, and spawn the engine task.
    pub async fn connect_with(servers: &[ServerSpec], timeouts: ZkLinkTimeouts) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        let engine = Engine::connect(servers, &timeouts, cmd_rx, connected.clone()).await?;
        let session_id = engine.session_id();
        let negotiated_timeout_ms = engine.negotiated_timeout_ms();
        tokio::spawn(engine.run());

        Ok(Self {
            cmd_tx,
            connected,
            session_id,
            negotiated_timeout_ms,
        })
    }

    // ── Blocking operations ─────────────────────────────────────────────

    /// Create a node. Returns the path actually created, which differs
    /// from the requested path for sequential nodes.
    pub async fn create(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        mode: CreateMode,
        acls: Vec<Acl>,
    ) -> Result<String> {
        match self
            .call(Op::Create {
                path: path.to_string(),
                data: data.into(),
                mode,
                acls,
            })
            .await?
        {
            Reply::Created { path } => Ok(path),
            other => Err(unexpected(other)),
        }
    }

    /// Delete a node.
    pub async fn delete(&self, path: &str) -> Result<()> {
        match self
            .call(Op::Delete {
                path: path.to_string(),
            })
            .await?
        {
            Reply::Deleted => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Read a node's data and stat.
    pub async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        match self
            .call(Op::Get {
                path: path.to_string(),
            })
            .await?
        {
            Reply::Data { data, stat } => Ok((data, stat)),
            other => Err(unexpected(other)),
        }
    }

    /// Read a node's data and register `subscriber` for the next data
    /// change on it.
    pub async fn get_w(
        &self,
        path: &str,
        subscriber: WatchSubscriber,
    ) -> Result<(Vec<u8>, Stat)> {
        match self
            .call_watch(
                WatchOp::Get {
                    path: path.to_string(),
                },
                subscriber,
            )
            .await?
        {
            Reply::Data { data, stat } => Ok((data, stat)),
            other => Err(unexpected(other)),
        }
    }

    /// Overwrite a node's data.
    pub async fn set(&self, path: &str, data: impl Into<Vec<u8>>) -> Result<Stat> {
        match self
            .call(Op::Set {
                path: path.to_string(),
                data: data.into(),
            })
            .await?
        {
            Reply::Stat(stat) => Ok(stat),
            other => Err(unexpected(other)),
        }
    }

    /// Read a node's ACL list.
    pub async fn get_acl(&self, path: &str) -> Result<(Vec<Acl>, Stat)> {
        match self
            .call(Op::GetAcl {
                path: path.to_string(),
            })
            .await?
        {
            Reply::Acls { acls, stat } => Ok((acls, stat)),
            other => Err(unexpected(other)),
        }
    }

    /// Replace a node's ACL list.
    pub async fn set_acl(&self, path: &str, acls: Vec<Acl>) -> Result<Stat> {
        match self
            .call(Op::SetAcl {
                path: path.to_string(),
                acls,
            })
            .await?
        {
            Reply::Stat(stat) => Ok(stat),
            other => Err(unexpected(other)),
        }
    }

    /// List a node's children.
    pub async fn ls(&self, path: &str) -> Result<Vec<String>> {
        match self
            .call(Op::Ls {
                path: path.to_string(),
            })
            .await?
        {
            Reply::Children { children } => Ok(children),
            other => Err(unexpected(other)),
        }
    }

    /// List a node's children and register `subscriber` for the next
    /// child change under it.
    pub async fn ls_w(&self, path: &str, subscriber: WatchSubscriber) -> Result<Vec<String>> {
        match self
            .call_watch(
                WatchOp::Ls {
                    path: path.to_string(),
                },
                subscriber,
            )
            .await?
        {
            Reply::Children { children } => Ok(children),
            other => Err(unexpected(other)),
        }
    }

    /// List a node's children with its stat.
    pub async fn ls2(&self, path: &str) -> Result<(Vec<String>, Stat)> {
        match self
            .call(Op::Ls2 {
                path: path.to_string(),
            })
            .await?
        {
            Reply::Children2 { children, stat } => Ok((children, stat)),
            other => Err(unexpected(other)),
        }
    }

    /// `ls2` plus a child watch.
    pub async fn ls2_w(
        &self,
        path: &str,
        subscriber: WatchSubscriber,
    ) -> Result<(Vec<String>, Stat)> {
        match self
            .call_watch(
                WatchOp::Ls2 {
                    path: path.to_string(),
                },
                subscriber,
            )
            .await?
        {
            Reply::Children2 { children, stat } => Ok((children, stat)),
            other => Err(unexpected(other)),
        }
    }

    // ── Non-blocking operations ─────────────────────────────────────────

    /// Submit a request without waiting for its reply. The reply is
    /// delivered to `reply_tx` as a [`CastReply`] carrying `tag`.
    pub async fn cast(&self, op: Op, reply_tx: mpsc::Sender<CastReply>, tag: u64) -> Result<()> {
        self.cmd_tx
            .send(EngineCmd::Submit {
                op,
                completion: Completion::NonBlocking { tx: reply_tx, tag },
            })
            .await
            .map_err(|_| ZkLinkError::SessionClosed)
    }

    /// Non-blocking watch-setting submission.
    pub async fn cast_w(
        &self,
        op: WatchOp,
        subscriber: WatchSubscriber,
        reply_tx: mpsc::Sender<CastReply>,
        tag: u64,
    ) -> Result<()> {
        self.cmd_tx
            .send(EngineCmd::SubmitWatch {
                op,
                subscriber,
                completion: Completion::NonBlocking { tx: reply_tx, tag },
            })
            .await
            .map_err(|_| ZkLinkError::SessionClosed)
    }

    // ── Session control ─────────────────────────────────────────────────

    /// Add authentication credentials to the session. At most one auth
    /// request may be outstanding; a second returns
    /// [`ZkLinkError::AuthInProgress`] without touching the wire.
    pub async fn add_auth(&self, scheme: &str, auth: impl Into<Vec<u8>>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCmd::AddAuth {
                scheme: scheme.to_string(),
                auth: auth.into(),
                reply: tx,
            })
            .await
            .map_err(|_| ZkLinkError::SessionClosed)?;
        match rx.await.map_err(|_| ZkLinkError::SessionClosed)?? {
            Reply::Authed => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Terminate the session. Every outstanding request fails with
    /// `ClientBroke` and every watch subscriber is told its watch is
    /// lost.
    pub async fn die(&self, reason: &str) {
        let _ = self
            .cmd_tx
            .send(EngineCmd::Die {
                reason: reason.to_string(),
            })
            .await;
    }

    /// Current xid counter (the next transaction id to be assigned).
    pub async fn iterations(&self) -> Result<i32> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCmd::Iterations { reply: tx })
            .await
            .map_err(|_| ZkLinkError::SessionClosed)?;
        rx.await.map_err(|_| ZkLinkError::SessionClosed)
    }

    /// Whether the engine is alive and past the handshake.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The 64-bit session identifier returned at handshake.
    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    /// The server-negotiated session timeout, in milliseconds.
    pub fn negotiated_timeout_ms(&self) -> u64 {
        self.negotiated_timeout_ms
    }

    async fn call(&self, op: Op) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCmd::Submit {
                op,
                completion: Completion::Blocking(tx),
            })
            .await
            .map_err(|_| ZkLinkError::SessionClosed)?;
        rx.await.map_err(|_| ZkLinkError::SessionClosed)?
    }

    async fn call_watch(&self, op: WatchOp, subscriber: WatchSubscriber) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCmd::SubmitWatch {
                op,
                subscriber,
                completion: Completion::Blocking(tx),
            })
            .await
            .map_err(|_| ZkLinkError::SessionClosed)?;
        rx.await.map_err(|_| ZkLinkError::SessionClosed)?
    }
}

fn unexpected(reply: Reply) -> ZkLinkError {
    ZkLinkError::ProtocolError(format!("unexpected reply shape: {:?}", reply))
}
