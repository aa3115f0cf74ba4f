//! Error types for zk-link client operations.
//!
//! Provides a single error enum covering all failure scenarios: server
//! error codes mapped from the wire, session-death notifications, and
//! local configuration or protocol violations.

use crate::models::Opcode;
use std::fmt;

/// Result type alias using [`ZkLinkError`]
pub type Result<T> = std::result::Result<T, ZkLinkError>;

/// Errors that can occur during zk-link operations.
///
/// Server-mapped kinds (`NoNode`, `NodeExists`, ...) are produced from the
/// error code carried in a reply header and delivered only to the request
/// that triggered them. `ClientBroke` is the terminal failure every
/// outstanding request receives when its session dies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZkLinkError {
    /// The requested node does not exist (wire -101)
    NoNode,

    /// The caller is not authorized for this operation (wire -102)
    NoAuth,

    /// Version check failed on a conditional write (wire -103)
    BadVersion,

    /// A node already exists at the target path (wire -110)
    NodeExists,

    /// Delete of a node that still has children (wire -111)
    NotEmpty,

    /// The session has been closed by the server (wire -112)
    ClosedSession,

    /// The supplied ACL list was rejected (wire -114)
    InvalidAcl,

    /// Server rejected the supplied credentials (wire -115)
    AuthFailed,

    /// A second `add_auth` was submitted while one was still pending
    AuthInProgress,

    /// Any unclassified server error code
    Unknown(i32),

    /// The session died while this request was in flight
    ClientBroke {
        /// Opcode of the request that was pending
        opcode: Opcode,
        /// Path the request addressed
        path: String,
    },

    /// TCP connect or handshake establishment failure
    ConnectionError(String),

    /// Malformed inbound frame or a reply for an unknown xid; session-fatal
    ProtocolError(String),

    /// Invalid local configuration (empty server list, bad interval)
    ConfigurationError(String),

    /// The session's engine has already terminated
    SessionClosed,
}

impl ZkLinkError {
    /// Map a non-zero reply error code to an error kind.
    pub fn from_wire_code(code: i32) -> Self {
        match code {
            -101 => Self::NoNode,
            -102 => Self::NoAuth,
            -103 => Self::BadVersion,
            -110 => Self::NodeExists,
            -111 => Self::NotEmpty,
            -112 => Self::ClosedSession,
            -114 => Self::InvalidAcl,
            -115 => Self::AuthFailed,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ZkLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoNode => write!(f, "Node does not exist"),
            Self::NoAuth => write!(f, "Not authorized"),
            Self::BadVersion => write!(f, "Version check failed"),
            Self::NodeExists => write!(f, "Node already exists"),
            Self::NotEmpty => write!(f, "Node has children"),
            Self::ClosedSession => write!(f, "Session closed by server"),
            Self::InvalidAcl => write!(f, "Invalid ACL"),
            Self::AuthFailed => write!(f, "Authentication failed"),
            Self::AuthInProgress => write!(f, "Another auth request is already pending"),
            Self::Unknown(code) => write!(f, "Unknown server error code: {}", code),
            Self::ClientBroke { opcode, path } => {
                write!(f, "Session died with request in flight: {:?} {}", opcode, path)
            },
            Self::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            Self::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
            Self::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            Self::SessionClosed => write!(f, "Session is closed"),
        }
    }
}

impl std::error::Error for ZkLinkError {}
