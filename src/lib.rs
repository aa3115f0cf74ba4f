//! Client connection engine for ZooKeeper-compatible coordination
//! services.
//!
//! zk-link multiplexes many concurrent logical requests onto one ordered
//! TCP stream to a single server, correlates framed replies back to their
//! originators, dispatches server-pushed watch events to the right
//! subscribers, and keeps the session alive with periodic heartbeats.
//!
//! - [`Session`] is one live session: blocking and non-blocking request
//!   submission, watch registration, auth, liveness introspection
//! - [`SessionManager`] spawns and tracks sessions and tears one down
//!   when any of its bound liveness tokens is cancelled
//! - Session loss is surfaced, never hidden: there is no automatic
//!   reconnection, and every outstanding request and watch receives
//!   exactly one terminal notification when an engine dies
//!
//! # Example
//!
//! ```rust,no_run
//! use zk_link::{Acl, CreateMode, ServerSpec, Session, WatchSubscriber};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> zk_link::Result<()> {
//! let session = Session::connect(&[ServerSpec::new("127.0.0.1", 2181, 30000)]).await?;
//!
//! session
//!     .create("/a", b"x".to_vec(), CreateMode::Persistent, vec![Acl::world_anyone_all()])
//!     .await?;
//!
//! let (watch_tx, mut watch_rx) = mpsc::channel(8);
//! let (data, _stat) = session
//!     .get_w("/a", WatchSubscriber::new(watch_tx, "my-watch"))
//!     .await?;
//! assert_eq!(data, b"x");
//!
//! // Fires once when /a's data next changes.
//! if let Some(message) = watch_rx.recv().await {
//!     println!("watch: {:?}", message);
//! }
//! # Ok(())
//! # }
//! ```

mod codec;
mod connection;
mod error;
mod manager;
mod models;
mod pending;
mod session;
mod timeouts;
mod watches;

pub use error::{Result, ZkLinkError};
pub use manager::{SessionManager, SessionId};
pub use models::{
    Acl, CastReply, ConnectionState, CreateMode, Op, Opcode, Permission, Reply, ServerSpec, Stat,
    WatchKind, WatchMessage, WatchOp, WatchSubscriber, WatchedEvent,
};
pub use session::Session;
pub use timeouts::{ZkLinkTimeouts, ZkLinkTimeoutsBuilder};
