//! Transport contract
//!
//! The object model never speaks a wire protocol itself. Everything it needs
//! from the server goes through [`Transport`], a blocking, session-sequential
//! interface with one implementation per protocol variant. [`InMemoryTransport`]
//! is a complete in-process implementation used by tests.

mod eval;
mod memory;

pub use memory::{Call, InMemoryTransport, SeedMessage};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Flag, SequenceSet, Uid};

/// Protocol variant a transport speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Imap,
}

impl Protocol {
    /// Well-known port for this protocol
    pub fn default_port(self, tls: bool) -> u16 {
        match (self, tls) {
            (Protocol::Imap, true) => 993,
            (Protocol::Imap, false) => 143,
        }
    }

    /// URL scheme, e.g. `imaps`
    pub fn scheme(self, tls: bool) -> &'static str {
        match (self, tls) {
            (Protocol::Imap, true) => "imaps",
            (Protocol::Imap, false) => "imap",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Imap => f.write_str("imap"),
        }
    }
}

/// A mailbox as returned by LIST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxInfo {
    pub name: String,
    /// Hierarchy delimiter, if the server uses one
    pub delimiter: Option<char>,
    /// Name attributes such as `\Noselect` or `\Subscribed`
    pub attributes: Vec<String>,
}

impl MailboxInfo {
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes
            .iter()
            .any(|a| a.eq_ignore_ascii_case(attribute))
    }
}

/// Status data items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusItem {
    Messages,
    Recent,
    Unseen,
    UidNext,
    UidValidity,
}

/// Mailbox counters, from SELECT or STATUS
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages (EXISTS)
    pub exists: u32,
    pub recent: u32,
    pub unseen: Option<u32>,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
}

impl MailboxStatus {
    /// Read a single counter
    pub fn get(&self, item: StatusItem) -> Option<u32> {
        match item {
            StatusItem::Messages => Some(self.exists),
            StatusItem::Recent => Some(self.recent),
            StatusItem::Unseen => self.unseen,
            StatusItem::UidNext => self.uid_next,
            StatusItem::UidValidity => self.uid_validity,
        }
    }
}

/// Data items requested from FETCH
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    Uid,
    Flags,
    Size,
    InternalDate,
    /// `BODY.PEEK[HEADER.FIELDS (...)]`
    HeaderFields(Vec<String>),
    /// The whole message, `BODY.PEEK[]`
    Rfc822,
    /// The body without headers, `BODY.PEEK[TEXT]`
    Text,
}

/// One message's worth of FETCH response data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRecord {
    /// Sequence number within the current selection
    pub seq: u32,
    pub uid: Option<Uid>,
    pub flags: Option<Vec<Flag>>,
    pub size: Option<u32>,
    pub internal_date: Option<DateTime<Utc>>,
    /// Raw header block for the requested header fields
    pub header: Option<Vec<u8>>,
    pub rfc822: Option<Vec<u8>>,
    pub text: Option<Vec<u8>>,
}

/// How STORE combines the given flags with the existing ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Add,
    Remove,
    Replace,
}

/// Usage and limit for one quota resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    pub root: String,
    pub resource: String,
    pub usage: u64,
    pub limit: u64,
}

/// One access control entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub identifier: String,
    pub rights: String,
}

/// Sort criteria for SORT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Arrival,
    Date,
    Subject,
    From,
    Size,
    Reverse(SortField),
}

/// Field half of a reversed sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Arrival,
    Date,
    Subject,
    From,
    Size,
}

impl SortKey {
    pub fn field(self) -> SortField {
        match self {
            SortKey::Arrival => SortField::Arrival,
            SortKey::Date => SortField::Date,
            SortKey::Subject => SortField::Subject,
            SortKey::From => SortField::From,
            SortKey::Size => SortField::Size,
            SortKey::Reverse(field) => field,
        }
    }

    pub fn is_reverse(self) -> bool {
        matches!(self, SortKey::Reverse(_))
    }
}

/// A live, blocking session with a mail server
///
/// Implementations are single-session-sequential: exactly one command is in
/// flight at a time and at most one mailbox is selected. Callers serialize
/// access through [`crate::connection::ConnectionGuard`]; implementations do
/// no locking of their own.
///
/// Any timeout or cancellation belongs inside the implementation.
pub trait Transport: Send {
    /// Protocol variant this transport speaks
    fn protocol(&self) -> Protocol;

    /// Raw capability strings as advertised, e.g. `AUTH=PLAIN`
    fn capabilities(&mut self) -> Result<Vec<String>>;

    fn authenticate(&mut self, mechanism: &str, username: &str, password: &str) -> Result<()>;

    fn logout(&mut self) -> Result<()>;

    /// LIST with a reference name and a `*`/`%` pattern
    fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<MailboxInfo>>;

    fn create(&mut self, mailbox: &str) -> Result<()>;

    fn delete(&mut self, mailbox: &str) -> Result<()>;

    fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    fn subscribe(&mut self, mailbox: &str) -> Result<()>;

    fn unsubscribe(&mut self, mailbox: &str) -> Result<()>;

    fn status(&mut self, mailbox: &str, items: &[StatusItem]) -> Result<MailboxStatus>;

    /// Select a mailbox, starting a new selection episode
    fn select(&mut self, mailbox: &str) -> Result<MailboxStatus>;

    /// SEARCH with already-tokenized criteria; returns sequence numbers
    fn search(&mut self, criteria: &[String]) -> Result<Vec<u32>>;

    fn fetch(&mut self, set: &SequenceSet, items: &[FetchItem]) -> Result<Vec<FetchRecord>>;

    fn uid_fetch(&mut self, set: &SequenceSet, items: &[FetchItem]) -> Result<Vec<FetchRecord>>;

    fn uid_store(&mut self, set: &SequenceSet, op: StoreOp, flags: &[Flag]) -> Result<()>;

    fn uid_copy(&mut self, set: &SequenceSet, destination: &str) -> Result<()>;

    fn append(
        &mut self,
        mailbox: &str,
        raw: &[u8],
        flags: &[Flag],
        date: DateTime<Utc>,
    ) -> Result<()>;

    fn expunge(&mut self) -> Result<()>;

    fn check(&mut self) -> Result<()>;

    /// Close the selected mailbox, ending the selection episode
    fn close(&mut self) -> Result<()>;

    fn get_quota_root(&mut self, mailbox: &str) -> Result<Vec<Quota>>;

    fn get_acl(&mut self, mailbox: &str) -> Result<Vec<AclEntry>>;

    /// SORT; returns sequence numbers in sorted order
    fn sort(&mut self, keys: &[SortKey], criteria: &[String], charset: &str) -> Result<Vec<u32>>;
}
