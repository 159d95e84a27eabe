//! Mail crate - object model over an IMAP connection
//!
//! This crate provides:
//! - Server, Mailbox and Message handles over one shared connection
//! - A filter DSL compiled into server-side searches plus client-side checks
//! - Per-connection selection locking (ConnectionGuard)
//! - Per-mailbox result caching with explicit refresh
//! - Batch actions (read, copy, move, delete), sliced to transport limits
//!
//! The wire protocol lives behind the [`Transport`] trait. An in-process
//! [`InMemoryTransport`] is included for tests.

pub mod account;
pub mod actions;
pub mod config;
pub mod connection;
pub mod models;
pub mod query;
pub mod storage;
pub mod transport;

pub use account::{BadAuthMechanismError, Mailbox, Message, ProtocolMismatchError, Server};
pub use actions::{Action, Batch, BatchError, BatchReport, Selector};
pub use config::{AuthMechanism, DEFAULT_SLICE_SIZE, ServerConfig};
pub use connection::{ConnectionGuard, Msn, Selection};
pub use models::{Flag, SequenceSet, Uid};
pub use query::{CompiledQuery, Filter, FilterParseError, FilterValue, compile};
pub use storage::MessageCache;
pub use transport::{
    AclEntry, Call, FetchItem, FetchRecord, InMemoryTransport, MailboxInfo, MailboxStatus,
    Protocol, Quota, SeedMessage, SortField, SortKey, StatusItem, StoreOp, Transport,
};
