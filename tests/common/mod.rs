//! In-process coordination server used by the integration tests.
//!
//! Speaks the framed protocol against an in-memory node tree and records
//! every request it sees, so tests can assert wire-level behavior:
//! watch-flag coalescing, heartbeat counts, auth serialization. Knobs on
//! [`ServerBehavior`] simulate the failure modes the engine must survive
//! (dropped heartbeat acks, silent auth, peer-side connection kills).

#![allow(dead_code)]

use bytes::{Buf, BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use zk_link::ServerSpec;

pub const OP_CREATE: i32 = 1;
pub const OP_DELETE: i32 = 2;
pub const OP_GET_DATA: i32 = 4;
pub const OP_SET_DATA: i32 = 5;
pub const OP_GET_ACL: i32 = 6;
pub const OP_SET_ACL: i32 = 7;
pub const OP_GET_CHILDREN: i32 = 8;
pub const OP_PING: i32 = 11;
pub const OP_GET_CHILDREN2: i32 = 12;
pub const OP_AUTH: i32 = 100;

const WATCH_DATA: u8 = 0;
const WATCH_CHILD: u8 = 1;

/// Tunable behavior of the scripted server.
#[derive(Debug, Clone)]
pub struct ServerBehavior {
    /// Session timeout granted at handshake.
    pub negotiated_timeout_ms: i64,
    /// Session id granted at handshake.
    pub session_id: i64,
    /// Swallow heartbeats instead of acking them.
    pub drop_heartbeat_acks: bool,
    /// Record auth requests but never answer them.
    pub silent_auth: bool,
    /// Error code for auth replies (0 grants the auth).
    pub auth_code: i32,
    /// Opcodes to record but never answer.
    pub ignore_opcodes: Vec<i32>,
    /// Answer requests under an xid the client never issued.
    pub corrupt_reply_xids: bool,
}

impl Default for ServerBehavior {
    fn default() -> Self {
        Self {
            negotiated_timeout_ms: 30000,
            session_id: 0x00C0_FFEE,
            drop_heartbeat_acks: false,
            silent_auth: false,
            auth_code: 0,
            ignore_opcodes: Vec::new(),
            corrupt_reply_xids: false,
        }
    }
}

/// One request observed on the wire.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub xid: i32,
    pub opcode: i32,
    /// Request path; the auth scheme for auth requests, empty for pings.
    pub path: String,
    /// Watch flag for `get`/`ls`/`ls2` frames, `None` for other opcodes.
    pub watch: Option<bool>,
}

pub struct TestServer {
    addr: SocketAddr,
    kill: CancellationToken,
    records: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestServer {
    /// Bind a listener on an ephemeral port and serve connections until
    /// killed. Every connection gets its own node tree and watch set.
    pub async fn spawn(behavior: ServerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let kill = CancellationToken::new();
        let records = Arc::new(Mutex::new(Vec::new()));

        let accept_kill = kill.clone();
        let accept_records = records.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_kill.cancelled() => return,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { return };
                        tokio::spawn(handle_conn(
                            stream,
                            behavior.clone(),
                            accept_kill.clone(),
                            accept_records.clone(),
                        ));
                    },
                }
            }
        });

        Self {
            addr,
            kill,
            records,
        }
    }

    pub fn spec(&self, wanted_timeout_ms: u32) -> ServerSpec {
        ServerSpec::new(
            self.addr.ip().to_string(),
            self.addr.port(),
            wanted_timeout_ms,
        )
    }

    /// Drop every open connection and stop accepting new ones.
    pub fn kill_connections(&self) {
        self.kill.cancel();
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.records.lock().unwrap().clone()
    }

    /// Recorded requests for one opcode, in arrival order.
    pub fn recorded_for(&self, opcode: i32) -> Vec<RecordedRequest> {
        self.recorded()
            .into_iter()
            .filter(|r| r.opcode == opcode)
            .collect()
    }
}

/// Receive with a test-sized timeout so a missing message fails the test
/// instead of hanging it.
pub async fn recv_timeout<T>(rx: &mut mpsc::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

/// Assert that nothing arrives on `rx` within a short window.
pub async fn assert_no_message<T: std::fmt::Debug>(rx: &mut mpsc::Receiver<T>) {
    let result = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(result.is_err(), "unexpected message: {:?}", result);
}

// ── Connection handler ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct Node {
    data: Vec<u8>,
    acls: Vec<(i32, String, String)>,
    version: i32,
    aversion: i32,
    ephemeral_owner: i64,
}

async fn handle_conn(
    stream: TcpStream,
    behavior: ServerBehavior,
    kill: CancellationToken,
    records: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    // Handshake: consume the 44-byte connect request, grant the session.
    let Some(Ok(request)) = framed.next().await else {
        return;
    };
    assert_eq!(request.len(), 44, "connect request must be 44 bytes");
    let mut reply = BytesMut::new();
    reply.put_i64(behavior.negotiated_timeout_ms);
    reply.put_i64(behavior.session_id);
    reply.put_i32(16);
    reply.put_bytes(0, 16);
    if framed.send(reply.freeze()).await.is_err() {
        return;
    }

    let mut tree: HashMap<String, Node> = HashMap::new();
    tree.insert("/".to_string(), Node::default());
    let mut watches: HashSet<(u8, String)> = HashSet::new();
    let mut zxid: i64 = 1;
    let mut seq: u64 = 0;

    loop {
        let frame = tokio::select! {
            _ = kill.cancelled() => return,
            frame = framed.next() => frame,
        };
        let Some(Ok(frame)) = frame else { return };
        let mut buf: &[u8] = &frame;
        let xid = buf.get_i32();
        let opcode = buf.get_i32();

        if opcode == OP_PING {
            records.lock().unwrap().push(RecordedRequest {
                xid,
                opcode,
                path: String::new(),
                watch: None,
            });
            if !behavior.drop_heartbeat_acks {
                let mut out = BytesMut::new();
                out.put_i32(-2);
                out.put_i64(zxid);
                out.put_i32(0);
                if framed.send(out.freeze()).await.is_err() {
                    return;
                }
            }
            continue;
        }

        if opcode == OP_AUTH {
            let _auth_type = buf.get_i32();
            let scheme = read_string(&mut buf);
            let _auth = read_buffer(&mut buf);
            records.lock().unwrap().push(RecordedRequest {
                xid,
                opcode,
                path: scheme,
                watch: None,
            });
            if !behavior.silent_auth {
                let mut out = BytesMut::new();
                out.put_i32(-4);
                out.put_i64(zxid);
                out.put_i32(behavior.auth_code);
                if framed.send(out.freeze()).await.is_err() {
                    return;
                }
            }
            continue;
        }

        let path = read_string(&mut buf);
        let watch = match opcode {
            OP_GET_DATA | OP_GET_CHILDREN | OP_GET_CHILDREN2 => Some(buf.get_u8() != 0),
            _ => None,
        };
        records.lock().unwrap().push(RecordedRequest {
            xid,
            opcode,
            path: path.clone(),
            watch,
        });
        if behavior.ignore_opcodes.contains(&opcode) {
            continue;
        }

        // (event_type, path) pairs to push after the reply
        let mut events: Vec<(i32, String)> = Vec::new();

        let result: Result<BytesMut, i32> = match opcode {
            OP_CREATE => {
                let data = read_buffer(&mut buf);
                let acls = read_acls(&mut buf);
                let flags = buf.get_i32();
                match parent_of(&path) {
                    Some(parent) if tree.contains_key(&parent) => {
                        let actual = if flags & 2 != 0 {
                            let name = format!("{}{:010}", path, seq);
                            seq += 1;
                            name
                        } else {
                            path.clone()
                        };
                        if tree.contains_key(&actual) {
                            Err(-110)
                        } else {
                            zxid += 1;
                            tree.insert(
                                actual.clone(),
                                Node {
                                    data,
                                    acls,
                                    version: 0,
                                    aversion: 0,
                                    ephemeral_owner: if flags & 1 != 0 {
                                        behavior.session_id
                                    } else {
                                        0
                                    },
                                },
                            );
                            if watches.remove(&(WATCH_CHILD, parent.clone())) {
                                events.push((4, parent));
                            }
                            let mut payload = BytesMut::new();
                            write_string(&mut payload, &actual);
                            Ok(payload)
                        }
                    },
                    _ => Err(-101),
                }
            },

            OP_DELETE => {
                let _version = buf.get_i32();
                if !tree.contains_key(&path) {
                    Err(-101)
                } else if !children_of(&tree, &path).is_empty() {
                    Err(-111)
                } else {
                    tree.remove(&path);
                    zxid += 1;
                    if watches.remove(&(WATCH_DATA, path.clone())) {
                        events.push((2, path.clone()));
                    }
                    if let Some(parent) = parent_of(&path) {
                        if watches.remove(&(WATCH_CHILD, parent.clone())) {
                            events.push((4, parent));
                        }
                    }
                    Ok(BytesMut::new())
                }
            },

            OP_GET_DATA => match tree.get(&path) {
                None => Err(-101),
                Some(node) => {
                    if watch == Some(true) {
                        watches.insert((WATCH_DATA, path.clone()));
                    }
                    let mut payload = BytesMut::new();
                    write_buffer(&mut payload, &node.data);
                    write_stat(
                        &mut payload,
                        node,
                        children_of(&tree, &path).len() as i32,
                        zxid,
                    );
                    Ok(payload)
                },
            },

            OP_SET_DATA => {
                let data = read_buffer(&mut buf);
                let _version = buf.get_i32();
                if !tree.contains_key(&path) {
                    Err(-101)
                } else {
                    zxid += 1;
                    let num_children = children_of(&tree, &path).len() as i32;
                    let node = tree.get_mut(&path).expect("checked above");
                    node.data = data;
                    node.version += 1;
                    let mut payload = BytesMut::new();
                    write_stat(&mut payload, node, num_children, zxid);
                    if watches.remove(&(WATCH_DATA, path.clone())) {
                        events.push((3, path.clone()));
                    }
                    Ok(payload)
                }
            },

            OP_GET_ACL => match tree.get(&path) {
                None => Err(-101),
                Some(node) => {
                    let mut payload = BytesMut::new();
                    write_acls(&mut payload, &node.acls);
                    write_stat(
                        &mut payload,
                        node,
                        children_of(&tree, &path).len() as i32,
                        zxid,
                    );
                    Ok(payload)
                },
            },

            OP_SET_ACL => {
                let acls = read_acls(&mut buf);
                let _version = buf.get_i32();
                if !tree.contains_key(&path) {
                    Err(-101)
                } else {
                    zxid += 1;
                    let num_children = children_of(&tree, &path).len() as i32;
                    let node = tree.get_mut(&path).expect("checked above");
                    node.acls = acls;
                    node.aversion += 1;
                    let mut payload = BytesMut::new();
                    write_stat(&mut payload, node, num_children, zxid);
                    Ok(payload)
                }
            },

            OP_GET_CHILDREN | OP_GET_CHILDREN2 => match tree.get(&path) {
                None => Err(-101),
                Some(node) => {
                    if watch == Some(true) {
                        watches.insert((WATCH_CHILD, path.clone()));
                    }
                    let mut children = children_of(&tree, &path);
                    children.sort();
                    let mut payload = BytesMut::new();
                    payload.put_i32(children.len() as i32);
                    for child in &children {
                        write_string(&mut payload, child);
                    }
                    if opcode == OP_GET_CHILDREN2 {
                        write_stat(&mut payload, node, children.len() as i32, zxid);
                    }
                    Ok(payload)
                },
            },

            other => panic!("test server got unexpected opcode {}", other),
        };

        let reply_xid = if behavior.corrupt_reply_xids {
            xid + 1000
        } else {
            xid
        };
        let mut out = BytesMut::new();
        out.put_i32(reply_xid);
        out.put_i64(zxid);
        match result {
            Ok(payload) => {
                out.put_i32(0);
                out.extend_from_slice(&payload);
            },
            Err(code) => out.put_i32(code),
        }
        if framed.send(out.freeze()).await.is_err() {
            return;
        }

        for (event_type, event_path) in events {
            let mut ev = BytesMut::new();
            ev.put_i32(-1);
            ev.put_i64(zxid);
            ev.put_i32(0);
            ev.put_i32(event_type);
            ev.put_i32(3); // connected
            write_string(&mut ev, &event_path);
            if framed.send(ev.freeze()).await.is_err() {
                return;
            }
        }
    }
}

// ── Tree helpers ────────────────────────────────────────────────────────────

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => None,
    }
}

fn basename(path: &str) -> &str {
    path.rfind('/').map(|idx| &path[idx + 1..]).unwrap_or(path)
}

fn children_of(tree: &HashMap<String, Node>, path: &str) -> Vec<String> {
    tree.keys()
        .filter(|key| key.as_str() != "/")
        .filter(|key| parent_of(key).as_deref() == Some(path))
        .map(|key| basename(key).to_string())
        .collect()
}

// ── Wire helpers ────────────────────────────────────────────────────────────

fn read_buffer(buf: &mut &[u8]) -> Vec<u8> {
    let len = buf.get_i32();
    if len < 0 {
        return Vec::new();
    }
    let mut data = vec![0u8; len as usize];
    buf.copy_to_slice(&mut data);
    data
}

fn read_string(buf: &mut &[u8]) -> String {
    String::from_utf8(read_buffer(buf)).expect("valid utf-8 string")
}

fn read_acls(buf: &mut &[u8]) -> Vec<(i32, String, String)> {
    let count = buf.get_i32();
    let mut acls = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        let perms = buf.get_i32();
        let scheme = read_string(buf);
        let id = read_string(buf);
        acls.push((perms, scheme, id));
    }
    acls
}

fn write_buffer(buf: &mut BytesMut, data: &[u8]) {
    buf.put_i32(data.len() as i32);
    buf.put_slice(data);
}

fn write_string(buf: &mut BytesMut, s: &str) {
    write_buffer(buf, s.as_bytes());
}

fn write_acls(buf: &mut BytesMut, acls: &[(i32, String, String)]) {
    buf.put_i32(acls.len() as i32);
    for (perms, scheme, id) in acls {
        buf.put_i32(*perms);
        write_string(buf, scheme);
        write_string(buf, id);
    }
}

fn write_stat(buf: &mut BytesMut, node: &Node, num_children: i32, zxid: i64) {
    buf.put_i64(1); // czxid
    buf.put_i64(zxid); // mzxid
    buf.put_i64(0); // ctime
    buf.put_i64(0); // mtime
    buf.put_i32(node.version);
    buf.put_i32(0); // cversion
    buf.put_i32(node.aversion);
    buf.put_i64(node.ephemeral_owner);
    buf.put_i32(node.data.len() as i32);
    buf.put_i32(num_children);
    buf.put_i64(zxid); // pzxid
}
