//! Message handles
//!
//! A [`Message`] is identified by its UID and owning mailbox. It never keeps
//! a sequence number. Fields returned inline by the resolving fetch are
//! cached; anything else is fetched lazily with `UID FETCH` on the owning
//! mailbox.

use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::mailbox::MailboxRef;
use crate::models::headers::parse_header_block;
use crate::models::{Flag, Uid};
use crate::transport::{FetchItem, FetchRecord, StoreOp};

/// Locally cached message data
#[derive(Default)]
struct Cached {
    /// Lowercased field name -> value; `None` when the field is absent
    headers: HashMap<String, Option<String>>,
    flags: Option<Vec<Flag>>,
    size: Option<u32>,
    raw: Option<Vec<u8>>,
    text: Option<String>,
}

/// One message in a mailbox
pub struct Message {
    uid: Uid,
    mailbox: Arc<MailboxRef>,
    cached: RwLock<Cached>,
}

impl Message {
    pub(crate) fn new(uid: Uid, mailbox: Arc<MailboxRef>) -> Self {
        Self {
            uid,
            mailbox,
            cached: RwLock::new(Cached::default()),
        }
    }

    /// Build a message from a fetch record, keeping every inline field.
    /// `requested_headers` lists the header fields the fetch asked for, so
    /// fields missing from the reply are remembered as absent.
    pub(crate) fn from_record(
        record: &FetchRecord,
        requested_headers: &[String],
        mailbox: Arc<MailboxRef>,
    ) -> Option<Self> {
        let message = Self::new(record.uid?, mailbox);
        message.absorb(record, requested_headers);
        Some(message)
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Current name of the owning mailbox
    pub fn mailbox_name(&self) -> String {
        self.mailbox.name()
    }

    pub(crate) fn mailbox_ref(&self) -> &Arc<MailboxRef> {
        &self.mailbox
    }

    fn read(&self) -> RwLockReadGuard<'_, Cached> {
        self.cached.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Cached> {
        self.cached.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge fetched data into the local cache
    pub(crate) fn absorb(&self, record: &FetchRecord, requested_headers: &[String]) {
        let mut cached = self.write();

        if let Some(block) = &record.header {
            let mut parsed = parse_header_block(block);
            for name in requested_headers {
                let name = name.to_ascii_lowercase();
                let value = parsed.remove(&name);
                cached.headers.insert(name, value);
            }
        }
        if let Some(flags) = &record.flags {
            cached.flags = Some(flags.clone());
        }
        if let Some(size) = record.size {
            cached.size = Some(size);
        }
        if let Some(raw) = &record.rfc822 {
            cached.raw = Some(raw.clone());
        }
        if let Some(text) = &record.text {
            cached.text = Some(String::from_utf8_lossy(text).into_owned());
        }
    }

    /// Reflect a successful STORE in the cached flags
    pub(crate) fn apply_store(&self, op: StoreOp, flags: &[Flag]) {
        let mut cached = self.write();
        let Some(current) = cached.flags.as_mut() else {
            return;
        };
        match op {
            StoreOp::Add => {
                for flag in flags {
                    if !current.contains(flag) {
                        current.push(flag.clone());
                    }
                }
            }
            StoreOp::Remove => current.retain(|f| !flags.contains(f)),
            StoreOp::Replace => *current = flags.to_vec(),
        }
    }

    /// UID FETCH this message on its own mailbox
    fn fetch(&self, items: &[FetchItem]) -> Result<FetchRecord> {
        let uid = self.uid;
        let name = self.mailbox.name();
        let records = self
            .mailbox
            .with_selection(|sel| sel.uid_fetch(&[uid], items))
            .with_context(|| format!("Failed to fetch message {} in {}", uid, name))?;

        records
            .into_iter()
            .find(|r| r.uid == Some(uid))
            .ok_or_else(|| anyhow!("Message {} no longer exists in {}", uid, name))
    }

    /// A single header value, fetched if not cached
    pub fn header(&self, name: &str) -> Result<Option<String>> {
        let mut headers = self.headers(&[name])?;
        Ok(headers.remove(&name.to_ascii_lowercase()))
    }

    /// Several header values keyed by lowercased name; absent fields are
    /// left out. Only uncached fields are fetched.
    pub fn headers(&self, names: &[&str]) -> Result<HashMap<String, String>> {
        let missing: Vec<String> = {
            let cached = self.read();
            names
                .iter()
                .map(|n| n.to_ascii_lowercase())
                .filter(|n| !cached.headers.contains_key(n))
                .collect()
        };

        if !missing.is_empty() {
            let record = self.fetch(&[FetchItem::HeaderFields(missing.clone())])?;
            self.absorb(&record, &missing);
        }

        let cached = self.read();
        Ok(names
            .iter()
            .map(|n| n.to_ascii_lowercase())
            .filter_map(|n| {
                let value = cached.headers.get(&n).cloned().flatten()?;
                Some((n, value))
            })
            .collect())
    }

    /// Header value from the local cache only
    pub fn cached_header(&self, name: &str) -> Option<String> {
        self.read()
            .headers
            .get(&name.to_ascii_lowercase())
            .cloned()
            .flatten()
    }

    pub fn flags(&self) -> Result<Vec<Flag>> {
        if let Some(flags) = self.cached_flags() {
            return Ok(flags);
        }
        self.refresh_flags()
    }

    /// Fetch flags from the server, bypassing the cache
    pub fn refresh_flags(&self) -> Result<Vec<Flag>> {
        let record = self.fetch(&[FetchItem::Flags])?;
        let flags = record.flags.clone().unwrap_or_default();
        self.write().flags = Some(flags.clone());
        Ok(flags)
    }

    pub fn cached_flags(&self) -> Option<Vec<Flag>> {
        self.read().flags.clone()
    }

    /// Whether the cached flags contain `flag`; never hits the server
    pub fn has_flag(&self, flag: &Flag) -> bool {
        self.read()
            .flags
            .as_ref()
            .is_some_and(|flags| flags.contains(flag))
    }

    /// Size in octets
    pub fn size(&self) -> Result<u32> {
        if let Some(size) = self.read().size {
            return Ok(size);
        }
        let record = self.fetch(&[FetchItem::Size])?;
        let size = record
            .size
            .ok_or_else(|| anyhow!("Server did not return a size for message {}", self.uid))?;
        self.write().size = Some(size);
        Ok(size)
    }

    /// The full RFC 822 message
    pub fn raw(&self) -> Result<Vec<u8>> {
        if let Some(raw) = self.read().raw.clone() {
            return Ok(raw);
        }
        let record = self.fetch(&[FetchItem::Rfc822])?;
        let raw = record
            .rfc822
            .ok_or_else(|| anyhow!("Server did not return message {}", self.uid))?;
        self.write().raw = Some(raw.clone());
        Ok(raw)
    }

    /// The body text, without headers
    pub fn text(&self) -> Result<String> {
        if let Some(text) = self.read().text.clone() {
            return Ok(text);
        }
        let record = self.fetch(&[FetchItem::Text])?;
        let text = record
            .text
            .map(|t| String::from_utf8_lossy(&t).into_owned())
            .ok_or_else(|| anyhow!("Server did not return text for message {}", self.uid))?;
        self.write().text = Some(text.clone());
        Ok(text)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = |name| self.cached_header(name).unwrap_or_default();
        write!(
            f,
            "{} # {} -> {} :: {}",
            self.uid,
            header("from"),
            header("to"),
            header("subject")
        )
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("uid", &self.uid)
            .field("mailbox", &self.mailbox.name())
            .finish()
    }
}
