//! MAPI ROP client library
//!
//! A client-side engine for servers that speak Remote Operations (ROPs)
//! inside `Execute` calls: the ROP buffer codec, the per-session server
//! object handle table, a call dispatcher that follows `Pending` responses
//! across drains, and a notification engine covering polling, `AsyncWait`
//! long-polls and UDP push hints.
//!
//! [`TcpTransport`] carries the remote calls over a framed TLS connection
//! with self-signed certificate support. Anything else implementing
//! [`Transport`] can stand in for it.

mod config;
pub mod connection;
mod error;
mod flag;
mod folder;
mod handle;
mod notify;
mod push;
mod retry;
mod session;
pub mod status;
mod transport;
pub mod wire;

pub use config::{ConnectionConfig, EngineConfig};
pub use error::{Error, Result, WireError};
pub use flag::{
    DeleteFolderFlags, LogonFlags, NotificationTypes, OpenFlags, OpenModeFlags, SaveFlags,
    SearchFlags, TableFlags,
};
pub use folder::SpecialFolder;
pub use handle::{HandleRef, HandleTable};
pub use notify::{Drained, Notification, NotificationState, Scope, Subscription};
pub use push::{PushListener, UdpPushListener};
pub use retry::{Backoff, RetryPolicy, SEARCH_TRANSIENT, TABLE_TRANSIENT};
pub use session::{CallOutcome, Folder, LinkedSessions, Logon, Reply, Role, Session, Table};
pub use transport::{
    AddressFamily, AsyncContextHandle, NOTIFICATION_PENDING, RoundTrip, TcpTransport, Transport,
    call,
};
