//! The single-session connection engine.
//!
//! One background task owns the framed TCP transport and every piece of
//! session state. It serializes three input sources through one
//! `select!`:
//!
//! - command-channel submissions from [`Session`](crate::Session) handles
//! - inbound frames from the server
//! - the heartbeat deadline
//!
//! That serialization is the only discipline protecting the xid counter,
//! the pending table, the watch registry and the socket's write half; no
//! locks appear anywhere on the data path.

use crate::codec::{self, Frame};
use crate::error::{Result, ZkLinkError};
use crate::models::{
    Op, Reply, ServerSpec, WatchKind, WatchMessage, WatchOp, WatchSubscriber,
};
use crate::pending::{Completion, PendingEntry, PendingTable};
use crate::timeouts::ZkLinkTimeouts;
use crate::watches::WatchTable;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

type Transport = Framed<TcpStream, LengthDelimitedCodec>;

/// Capacity of the command channel between session handles and the engine.
pub(crate) const CMD_CHANNEL_CAPACITY: usize = 256;

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from [`Session`](crate::Session) handles to the engine task.
pub(crate) enum EngineCmd {
    /// Submit a logical request.
    Submit { op: Op, completion: Completion },
    /// Submit a watch-setting request: register the subscriber and send
    /// the watching or non-watching opcode variant per the coalescing
    /// contract.
    SubmitWatch {
        op: WatchOp,
        subscriber: WatchSubscriber,
        completion: Completion,
    },
    /// Submit an auth request on the serialized auth slot.
    AddAuth {
        scheme: String,
        auth: Vec<u8>,
        reply: oneshot::Sender<Result<Reply>>,
    },
    /// Read the current xid counter.
    Iterations { reply: oneshot::Sender<i32> },
    /// Terminate the session.
    Die { reason: String },
}

// ── Engine ──────────────────────────────────────────────────────────────────

pub(crate) struct Engine {
    transport: Transport,
    cmd_rx: mpsc::Receiver<EngineCmd>,
    heartbeat_interval: Duration,
    session_id: i64,
    negotiated_timeout_ms: u64,
    /// Next xid to assign; strictly increasing, starts at 1, never
    /// incremented for heartbeats or auth.
    xid: i32,
    pending: PendingTable,
    watches: WatchTable,
    /// 0 or 1. A heartbeat deadline firing while this is 1 means two
    /// consecutive missed acks and kills the session.
    outstanding_heartbeats: u8,
    connected: Arc<AtomicBool>,
}

impl Engine {
    /// Pick one server uniformly at random, open the framed connection
    /// and perform the session handshake.
    pub(crate) async fn connect(
        servers: &[ServerSpec],
        timeouts: &ZkLinkTimeouts,
        cmd_rx: mpsc::Receiver<EngineCmd>,
        connected: Arc<AtomicBool>,
    ) -> Result<Engine> {
        if servers.is_empty() {
            return Err(ZkLinkError::ConfigurationError(
                "server list is empty".to_string(),
            ));
        }
        let chosen = &servers[rand::rng().random_range(0..servers.len())];
        log::debug!("[zk-link] connecting to {}", chosen.address());

        let stream = tokio::time::timeout(
            timeouts.connection_timeout,
            TcpStream::connect(chosen.address()),
        )
        .await
        .map_err(|_| {
            ZkLinkError::ConnectionError(format!("connect timeout to {}", chosen.address()))
        })?
        .map_err(|e| {
            ZkLinkError::ConnectionError(format!("connect to {} failed: {}", chosen.address(), e))
        })?;

        let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

        transport
            .send(codec::encode_connect_request(chosen.wanted_timeout_ms))
            .await
            .map_err(|e| ZkLinkError::ConnectionError(format!("handshake send failed: {}", e)))?;

        let reply = tokio::time::timeout(timeouts.handshake_timeout, transport.next())
            .await
            .map_err(|_| ZkLinkError::ConnectionError("handshake timed out".to_string()))?
            .ok_or_else(|| {
                ZkLinkError::ConnectionError("connection closed during handshake".to_string())
            })?
            .map_err(|e| ZkLinkError::ConnectionError(format!("handshake read failed: {}", e)))?;

        let (negotiated_timeout_ms, session_id) = codec::decode_connect_reply(&reply)?;
        log::info!(
            "[zk-link] session established: id={:#x} negotiated_timeout={}ms",
            session_id,
            negotiated_timeout_ms
        );
        connected.store(true, Ordering::SeqCst);

        Ok(Engine {
            transport,
            cmd_rx,
            heartbeat_interval: clamp_heartbeat(timeouts.heartbeat_interval, negotiated_timeout_ms),
            session_id,
            negotiated_timeout_ms,
            xid: 1,
            pending: PendingTable::new(),
            watches: WatchTable::new(),
            outstanding_heartbeats: 0,
            connected,
        })
    }

    pub(crate) fn session_id(&self) -> i64 {
        self.session_id
    }

    pub(crate) fn negotiated_timeout_ms(&self) -> u64 {
        self.negotiated_timeout_ms
    }

    /// The engine event loop. Runs until a termination trigger, then
    /// fans out terminal notifications and drops the transport.
    pub(crate) async fn run(mut self) {
        let mut heartbeat_deadline = Instant::now() + self.heartbeat_interval;

        let reason: String = loop {
            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(heartbeat_deadline) => {
                    if self.outstanding_heartbeats > 0 {
                        break "heartattack".to_string();
                    }
                    log::debug!("[zk-link] sending heartbeat (session {:#x})", self.session_id);
                    if let Err(e) = self.transport.send(codec::encode_heartbeat()).await {
                        break format!("heartbeat send failed: {}", e);
                    }
                    self.outstanding_heartbeats = 1;
                    heartbeat_deadline = Instant::now() + self.heartbeat_interval;
                },

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(EngineCmd::Submit { op, completion }) => {
                        if let Err(reason) = self.submit(op, None, completion).await {
                            break reason;
                        }
                    },
                    Some(EngineCmd::SubmitWatch { op, subscriber, completion }) => {
                        let kind = op.kind();
                        if let Err(reason) =
                            self.submit(op.into_op(), Some((kind, subscriber)), completion).await
                        {
                            break reason;
                        }
                    },
                    Some(EngineCmd::AddAuth { scheme, auth, reply }) => {
                        if let Err(reason) = self.handle_add_auth(scheme, auth, reply).await {
                            break reason;
                        }
                    },
                    Some(EngineCmd::Iterations { reply }) => {
                        let _ = reply.send(self.xid);
                    },
                    Some(EngineCmd::Die { reason }) => break reason,
                    None => break "all session handles dropped".to_string(),
                },

                frame = self.transport.next() => match frame {
                    Some(Ok(bytes)) => {
                        if let Err(reason) = self.route_frame(bytes.freeze()).await {
                            break reason;
                        }
                    },
                    Some(Err(e)) => break format!("transport error: {}", e),
                    None => break "connection closed by peer".to_string(),
                },
            }
        };

        self.terminate(&reason).await;
    }

    /// Allocate an xid, register the watch subscriber if any, record the
    /// pending entry and put the frame on the wire. The pending entry is
    /// inserted before the frame leaves the socket.
    async fn submit(
        &mut self,
        op: Op,
        watch: Option<(WatchKind, WatchSubscriber)>,
        completion: Completion,
    ) -> std::result::Result<(), String> {
        let xid = self.xid;
        self.xid += 1;

        // The subscriber is always appended; the watching variant goes on
        // the wire only when the server does not yet hold a watch for
        // this (kind, path).
        let install = match watch {
            Some((kind, subscriber)) => self.watches.subscribe(kind, op.path(), subscriber),
            None => false,
        };

        let frame = codec::encode_request(&op, xid, install);
        self.pending.insert(
            xid,
            PendingEntry {
                opcode: op.opcode(),
                path: op.path().to_string(),
                completion,
            },
        );
        self.transport
            .send(frame)
            .await
            .map_err(|e| format!("send failed: {}", e))
    }

    async fn handle_add_auth(
        &mut self,
        scheme: String,
        auth: Vec<u8>,
        reply: oneshot::Sender<Result<Reply>>,
    ) -> std::result::Result<(), String> {
        if self.pending.auth_in_progress() {
            let _ = reply.send(Err(ZkLinkError::AuthInProgress));
            return Ok(());
        }
        let frame = codec::encode_auth_request(&scheme, &auth);
        self.pending.set_auth(reply);
        self.transport
            .send(frame)
            .await
            .map_err(|e| format!("auth send failed: {}", e))
    }

    /// Classify one inbound frame and drive the matching state
    /// transition. Returns the session-fatal reason on protocol
    /// violations.
    async fn route_frame(&mut self, frame: Bytes) -> std::result::Result<(), String> {
        let frame = match codec::decode_frame(frame) {
            Ok(frame) => frame,
            Err(e) => return Err(format!("malformed inbound frame: {}", e)),
        };

        match frame {
            Frame::HeartbeatAck => {
                if self.outstanding_heartbeats > 0 {
                    self.outstanding_heartbeats -= 1;
                } else {
                    log::debug!("[zk-link] stray heartbeat ack");
                }
            },

            Frame::WatchEvent(event) => {
                let subs = self.watches.take(event.kind, &event.path);
                if subs.is_empty() {
                    log::debug!(
                        "[zk-link] watch event with no subscribers: {:?} {}",
                        event.kind,
                        event.path
                    );
                }
                for sub in subs {
                    let msg = WatchMessage::Fired {
                        payload: sub.payload,
                        event: event.clone(),
                    };
                    if sub.tx.try_send(msg).is_err() {
                        log::debug!(
                            "[zk-link] watch subscriber for {} is gone or full",
                            event.path
                        );
                    }
                }
            },

            Frame::AuthReply { code } => {
                let Some(tx) = self.pending.take_auth() else {
                    log::debug!("[zk-link] auth reply with no auth outstanding");
                    return Ok(());
                };
                let result = match code {
                    0 => Ok(Reply::Authed),
                    -115 => Err(ZkLinkError::AuthFailed),
                    other => Err(ZkLinkError::Unknown(other)),
                };
                let _ = tx.send(result);
            },

            Frame::Reply {
                xid,
                zxid: _,
                code,
                payload,
            } => {
                let Some(entry) = self.pending.remove(xid) else {
                    return Err(format!("reply for unknown xid {}", xid));
                };
                if code != 0 {
                    entry
                        .completion
                        .deliver(Err(ZkLinkError::from_wire_code(code)));
                } else {
                    match codec::decode_reply(entry.opcode, &payload) {
                        Ok(reply) => entry.completion.deliver(Ok(reply)),
                        Err(e) => {
                            entry.completion.deliver(Err(e.clone()));
                            return Err(format!("malformed reply payload for xid {}: {}", xid, e));
                        },
                    }
                }
            },
        }
        Ok(())
    }

    /// Fan out terminal notifications and close the transport. Watches
    /// are notified before pending completions; the order is part of the
    /// contract.
    async fn terminate(mut self, reason: &str) {
        log::info!(
            "[zk-link] session {:#x} terminating: {}",
            self.session_id,
            reason
        );
        self.connected.store(false, Ordering::SeqCst);

        for ((kind, path), subs) in self.watches.drain() {
            for sub in subs {
                let msg = WatchMessage::Lost {
                    payload: sub.payload,
                    kind,
                    path: path.clone(),
                };
                if sub.tx.try_send(msg).is_err() {
                    log::debug!("[zk-link] watch-lost receiver for {} is gone", path);
                }
            }
        }
        self.pending.fail_all();

        let _ = self.transport.close().await;
    }
}

/// Keep the heartbeat interval strictly below half the negotiated
/// session timeout.
fn clamp_heartbeat(configured: Duration, negotiated_timeout_ms: u64) -> Duration {
    let half = Duration::from_millis(negotiated_timeout_ms / 2);
    if configured < half {
        configured
    } else {
        let clamped = Duration::from_millis((negotiated_timeout_ms / 4).max(1));
        log::warn!(
            "[zk-link] heartbeat interval {:?} is not below half the negotiated timeout ({}ms); clamping to {:?}",
            configured,
            negotiated_timeout_ms,
            clamped
        );
        clamped
    }
}
