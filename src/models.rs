//! Data models for the zk-link client library.
//!
//! Defines the operation and reply shapes exchanged with the connection
//! engine, node metadata (`Stat`), ACLs, watch kinds and the notification
//! messages delivered to subscribers and non-blocking callers.

use crate::error::Result;
use tokio::sync::mpsc;

/// Wire opcodes for the operations the engine exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Create,
    Delete,
    GetData,
    SetData,
    GetAcl,
    SetAcl,
    GetChildren,
    Ping,
    GetChildren2,
    Auth,
}

impl Opcode {
    /// Wire encoding of the opcode.
    pub fn wire(self) -> i32 {
        match self {
            Self::Create => 1,
            Self::Delete => 2,
            Self::GetData => 4,
            Self::SetData => 5,
            Self::GetAcl => 6,
            Self::SetAcl => 7,
            Self::GetChildren => 8,
            Self::Ping => 11,
            Self::GetChildren2 => 12,
            Self::Auth => 100,
        }
    }
}

/// Creation flags for [`Op::Create`], encoded as
/// `ephemeral << 0 | sequential << 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    /// Plain persistent node
    #[default]
    Persistent,
    /// Deleted by the server when the creating session ends
    Ephemeral,
    /// Name is suffixed with a server-assigned monotonic counter
    Sequential,
    /// Both ephemeral and sequential
    EphemeralSequential,
}

impl CreateMode {
    /// Wire flag encoding.
    pub fn flags(self) -> i32 {
        match self {
            Self::Persistent => 0,
            Self::Ephemeral => 1,
            Self::Sequential => 2,
            Self::EphemeralSequential => 3,
        }
    }
}

/// Permission bits carried in an [`Acl`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission(u32);

impl Permission {
    pub const NONE: Permission = Permission(0);
    pub const READ: Permission = Permission(1 << 0);
    pub const WRITE: Permission = Permission(1 << 1);
    pub const CREATE: Permission = Permission(1 << 2);
    pub const DELETE: Permission = Permission(1 << 3);
    pub const ADMIN: Permission = Permission(1 << 4);
    pub const ALL: Permission = Permission(0b11111);

    /// Raw wire bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Reconstruct from wire bits, keeping only defined flags.
    pub fn from_bits(bits: u32) -> Self {
        Permission(bits & Self::ALL.0)
    }

    /// Whether every bit of `other` is set in `self`.
    pub fn contains(self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Permission) -> Permission {
        Permission(self.0 | rhs.0)
    }
}

/// One access-control entry: a permission set granted to an identity
/// under a scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub perms: Permission,
    pub scheme: String,
    pub id: String,
}

impl Acl {
    pub fn new(perms: Permission, scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            perms,
            scheme: scheme.into(),
            id: id.into(),
        }
    }

    /// The standard open ACL: all permissions to `world:anyone`.
    pub fn world_anyone_all() -> Self {
        Self::new(Permission::ALL, "world", "anyone")
    }
}

/// Node metadata returned alongside data and children replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    pub czxid: i64,
    pub mzxid: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub version: i32,
    pub cversion: i32,
    pub aversion: i32,
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
    pub pzxid: i64,
}

// ── Operations ──────────────────────────────────────────────────────────────

/// A logical request submitted to the connection engine.
#[derive(Debug, Clone)]
pub enum Op {
    Create {
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
        acls: Vec<Acl>,
    },
    Delete {
        path: String,
    },
    Get {
        path: String,
    },
    Set {
        path: String,
        data: Vec<u8>,
    },
    GetAcl {
        path: String,
    },
    SetAcl {
        path: String,
        acls: Vec<Acl>,
    },
    Ls {
        path: String,
    },
    Ls2 {
        path: String,
    },
}

impl Op {
    /// Wire opcode for this operation.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Create { .. } => Opcode::Create,
            Self::Delete { .. } => Opcode::Delete,
            Self::Get { .. } => Opcode::GetData,
            Self::Set { .. } => Opcode::SetData,
            Self::GetAcl { .. } => Opcode::GetAcl,
            Self::SetAcl { .. } => Opcode::SetAcl,
            Self::Ls { .. } => Opcode::GetChildren,
            Self::Ls2 { .. } => Opcode::GetChildren2,
        }
    }

    /// Path this operation addresses.
    pub fn path(&self) -> &str {
        match self {
            Self::Create { path, .. }
            | Self::Delete { path }
            | Self::Get { path }
            | Self::Set { path, .. }
            | Self::GetAcl { path }
            | Self::SetAcl { path, .. }
            | Self::Ls { path }
            | Self::Ls2 { path } => path,
        }
    }
}

/// The watch-setting variants of the read operations (`getw`, `lsw`,
/// `ls2w`). Callers supply a [`WatchSubscriber`] alongside; the engine
/// decides whether the wire frame carries the watching flag.
#[derive(Debug, Clone)]
pub enum WatchOp {
    Get { path: String },
    Ls { path: String },
    Ls2 { path: String },
}

impl WatchOp {
    /// The watch kind this operation installs.
    pub fn kind(&self) -> WatchKind {
        match self {
            Self::Get { .. } => WatchKind::Data,
            Self::Ls { .. } | Self::Ls2 { .. } => WatchKind::Child,
        }
    }

    /// Path this operation addresses.
    pub fn path(&self) -> &str {
        match self {
            Self::Get { path } | Self::Ls { path } | Self::Ls2 { path } => path,
        }
    }

    /// The underlying read operation.
    pub fn into_op(self) -> Op {
        match self {
            Self::Get { path } => Op::Get { path },
            Self::Ls { path } => Op::Ls { path },
            Self::Ls2 { path } => Op::Ls2 { path },
        }
    }
}

/// A successful reply, shaped per opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `create`: the path actually created (sequential suffix included)
    Created { path: String },
    /// `delete`
    Deleted,
    /// `get` / `getw`
    Data { data: Vec<u8>, stat: Stat },
    /// `set` / `set_acl`
    Stat(Stat),
    /// `get_acl`
    Acls { acls: Vec<Acl>, stat: Stat },
    /// `ls` / `lsw`
    Children { children: Vec<String> },
    /// `ls2` / `ls2w`
    Children2 { children: Vec<String>, stat: Stat },
    /// `add_auth`
    Authed,
}

// ── Watches ─────────────────────────────────────────────────────────────────

/// Kind of server-side watch. `Exist` is reserved; the core registers
/// `Data` (via `getw`) and `Child` (via `lsw`/`ls2w`) watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Data,
    Child,
    Exist,
}

/// Connection state carried inside a server-pushed watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    AuthFailed,
    Expired,
    Unknown(i32),
}

impl ConnectionState {
    /// Map the wire state value.
    pub fn from_wire(state: i32) -> Self {
        match state {
            0 => Self::Disconnected,
            3 => Self::Connected,
            4 => Self::AuthFailed,
            -112 => Self::Expired,
            other => Self::Unknown(other),
        }
    }
}

/// A fired watch, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub path: String,
    pub kind: WatchKind,
    pub state: ConnectionState,
}

/// One subscriber endpoint registered for a `(kind, path)` watch.
///
/// `payload` is an opaque routing key chosen by the subscriber; it is
/// echoed back in every notification so one receiver channel can serve
/// many watches.
#[derive(Debug, Clone)]
pub struct WatchSubscriber {
    pub tx: mpsc::Sender<WatchMessage>,
    pub payload: String,
}

impl WatchSubscriber {
    pub fn new(tx: mpsc::Sender<WatchMessage>, payload: impl Into<String>) -> Self {
        Self {
            tx,
            payload: payload.into(),
        }
    }
}

/// Notification delivered to a [`WatchSubscriber`].
#[derive(Debug, Clone)]
pub enum WatchMessage {
    /// The server-side watch fired.
    Fired { payload: String, event: WatchedEvent },
    /// The session died before the watch fired; it will never fire.
    Lost {
        payload: String,
        kind: WatchKind,
        path: String,
    },
}

// ── Non-blocking replies ────────────────────────────────────────────────────

/// Reply to a non-blocking submission, tagged with the caller's tag.
#[derive(Debug)]
pub struct CastReply {
    pub tag: u64,
    pub result: Result<Reply>,
}

// ── Server addressing ───────────────────────────────────────────────────────

/// One server endpoint plus the session timeout to request from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub host: String,
    pub port: u16,
    pub wanted_timeout_ms: u32,
}

impl ServerSpec {
    pub fn new(host: impl Into<String>, port: u16, wanted_timeout_ms: u32) -> Self {
        Self {
            host: host.into(),
            port,
            wanted_timeout_ms,
        }
    }

    /// `host:port` form used for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
