//! Session manager: spawns and tracks connection engines, and binds each
//! one to a set of external liveness tokens.
//!
//! Every monitor token gets a death-watch task; when any bound token is
//! cancelled, the manager tears the associated session down
//! asynchronously. The manager's own state is mutated only inside its
//! command loop.

use crate::error::{Result, ZkLinkError};
use crate::models::ServerSpec;
use crate::session::Session;
use crate::timeouts::ZkLinkTimeouts;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Identifier the manager assigns to each tracked session.
pub type SessionId = u64;

/// Capacity of the manager command channel.
const CMD_CHANNEL_CAPACITY: usize = 64;

enum ManagerCmd {
    Start {
        servers: Option<Vec<ServerSpec>>,
        monitors: Vec<CancellationToken>,
        reply: oneshot::Sender<Result<SessionId>>,
    },
    GetSession {
        id: SessionId,
        reply: oneshot::Sender<Result<Session>>,
    },
    End {
        id: SessionId,
        reason: String,
        reply: oneshot::Sender<Result<()>>,
    },
    AddMonitors {
        id: SessionId,
        monitors: Vec<CancellationToken>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// A death-watch task observed its token cancelled.
    MonitorDown { id: SessionId },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Spawns and tracks [`Session`]s, tearing each down when any of its
/// monitor tokens is cancelled.
///
/// # Examples
///
/// ```rust,no_run
/// use zk_link::{ServerSpec, SessionManager};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> zk_link::Result<()> {
/// let manager = SessionManager::new(vec![ServerSpec::new("127.0.0.1", 2181, 30000)]);
///
/// let worker_liveness = CancellationToken::new();
/// let id = manager
///     .start_session_with(None, vec![worker_liveness.clone()])
///     .await?;
/// let session = manager.session(id).await?;
/// let children = session.ls("/").await?;
/// println!("root children: {:?}", children);
///
/// // Cancelling the token ends the session asynchronously.
/// worker_liveness.cancel();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionManager {
    cmd_tx: mpsc::Sender<ManagerCmd>,
}

impl SessionManager {
    /// Create a manager with a default server list and default timeouts.
    pub fn new(default_servers: Vec<ServerSpec>) -> Self {
        Self::with_timeouts(default_servers, ZkLinkTimeouts::default())
    }

    /// Create a manager with explicit timeouts for the sessions it spawns.
    pub fn with_timeouts(default_servers: Vec<ServerSpec>, timeouts: ZkLinkTimeouts) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let task = ManagerTask {
            defaults: default_servers,
            timeouts,
            cmd_rx,
            cmd_tx: cmd_tx.clone(),
            stop: CancellationToken::new(),
            next_id: 1,
            sessions: HashMap::new(),
        };
        tokio::spawn(task.run());
        Self { cmd_tx }
    }

    /// Start a session against the default server list, with no monitors.
    pub async fn start_session(&self) -> Result<SessionId> {
        self.start_session_with(None, Vec::new()).await
    }

    /// Start a session. `servers` overrides the default list when given;
    /// each monitor token gets a death-watch bound to the new session.
    pub async fn start_session_with(
        &self,
        servers: Option<Vec<ServerSpec>>,
        monitors: Vec<CancellationToken>,
    ) -> Result<SessionId> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCmd::Start {
                servers,
                monitors,
                reply: tx,
            })
            .await
            .map_err(|_| ZkLinkError::SessionClosed)?;
        rx.await.map_err(|_| ZkLinkError::SessionClosed)?
    }

    /// Fetch a handle to a tracked session.
    pub async fn session(&self, id: SessionId) -> Result<Session> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCmd::GetSession { id, reply: tx })
            .await
            .map_err(|_| ZkLinkError::SessionClosed)?;
        rx.await.map_err(|_| ZkLinkError::SessionClosed)?
    }

    /// End a tracked session with the given reason and drop the
    /// association.
    pub async fn end_session(&self, id: SessionId, reason: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCmd::End {
                id,
                reason: reason.to_string(),
                reply: tx,
            })
            .await
            .map_err(|_| ZkLinkError::SessionClosed)?;
        rx.await.map_err(|_| ZkLinkError::SessionClosed)?
    }

    /// Install additional death-watches attributed to a tracked session.
    pub async fn add_monitors(
        &self,
        id: SessionId,
        monitors: Vec<CancellationToken>,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCmd::AddMonitors {
                id,
                monitors,
                reply: tx,
            })
            .await
            .map_err(|_| ZkLinkError::SessionClosed)?;
        rx.await.map_err(|_| ZkLinkError::SessionClosed)?
    }

    /// Shut the manager down, ending every tracked session.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ManagerCmd::Shutdown { reply: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

// ── Background manager task ─────────────────────────────────────────────────

struct Tracked {
    session: Session,
    monitors: Vec<CancellationToken>,
}

struct ManagerTask {
    defaults: Vec<ServerSpec>,
    timeouts: ZkLinkTimeouts,
    cmd_rx: mpsc::Receiver<ManagerCmd>,
    /// Clone handed to death-watch tasks so they can report back.
    cmd_tx: mpsc::Sender<ManagerCmd>,
    /// Cancelled on shutdown so death-watch tasks do not linger.
    stop: CancellationToken,
    next_id: SessionId,
    sessions: HashMap<SessionId, Tracked>,
}

impl ManagerTask {
    async fn run(mut self) {
        loop {
            let Some(cmd) = self.cmd_rx.recv().await else {
                // Every manager handle dropped
                self.shutdown_all("manager dropped");
                return;
            };
            match cmd {
                ManagerCmd::Start {
                    servers,
                    monitors,
                    reply,
                } => {
                    let servers = servers.unwrap_or_else(|| self.defaults.clone());
                    match Session::connect_with(&servers, self.timeouts.clone()).await {
                        Ok(session) => {
                            let id = self.next_id;
                            self.next_id += 1;
                            self.install_monitors(id, &monitors);
                            self.sessions.insert(id, Tracked { session, monitors });
                            log::debug!("[zk-link] manager started session {}", id);
                            let _ = reply.send(Ok(id));
                        },
                        Err(e) => {
                            let _ = reply.send(Err(e));
                        },
                    }
                },

                ManagerCmd::GetSession { id, reply } => {
                    let result = self
                        .sessions
                        .get(&id)
                        .map(|tracked| tracked.session.clone())
                        .ok_or_else(|| unknown_session(id));
                    let _ = reply.send(result);
                },

                ManagerCmd::End { id, reason, reply } => match self.sessions.remove(&id) {
                    Some(tracked) => {
                        end_async(id, tracked, reason);
                        let _ = reply.send(Ok(()));
                    },
                    None => {
                        let _ = reply.send(Err(unknown_session(id)));
                    },
                },

                ManagerCmd::AddMonitors {
                    id,
                    monitors,
                    reply,
                } => {
                    if !self.sessions.contains_key(&id) {
                        let _ = reply.send(Err(unknown_session(id)));
                        continue;
                    }
                    self.install_monitors(id, &monitors);
                    if let Some(tracked) = self.sessions.get_mut(&id) {
                        tracked.monitors.extend(monitors);
                    }
                    let _ = reply.send(Ok(()));
                },

                ManagerCmd::MonitorDown { id } => {
                    if let Some(tracked) = self.sessions.remove(&id) {
                        log::warn!(
                            "[zk-link] monitored identity for session {} died; ending connection",
                            id
                        );
                        end_async(id, tracked, "essential process died".to_string());
                    }
                },

                ManagerCmd::Shutdown { reply } => {
                    self.shutdown_all("manager shutdown");
                    let _ = reply.send(());
                    return;
                },
            }
        }
    }

    /// Spawn one death-watch task per monitor token. The watch reports
    /// back over the command channel so the teardown runs under the
    /// manager's serialization without blocking its loop.
    fn install_monitors(&self, id: SessionId, monitors: &[CancellationToken]) {
        for token in monitors {
            let token = token.clone();
            let stop = self.stop.clone();
            let cmd_tx = self.cmd_tx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = stop.cancelled() => {},
                    _ = token.cancelled() => {
                        let _ = cmd_tx.send(ManagerCmd::MonitorDown { id }).await;
                    },
                }
            });
        }
    }

    fn shutdown_all(&mut self, reason: &str) {
        for (id, tracked) in self.sessions.drain() {
            end_async(id, tracked, reason.to_string());
        }
        self.stop.cancel();
    }
}

/// Hand the `die` call to its own task so the manager loop never waits
/// on an engine.
fn end_async(id: SessionId, tracked: Tracked, reason: String) {
    log::debug!(
        "[zk-link] ending session {} ({} monitors released): {}",
        id,
        tracked.monitors.len(),
        reason
    );
    tokio::spawn(async move {
        tracked.session.die(&reason).await;
    });
}

fn unknown_session(id: SessionId) -> ZkLinkError {
    ZkLinkError::ConfigurationError(format!("unknown session id {}", id))
}
