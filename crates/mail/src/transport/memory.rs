//! In-memory transport implementation
//!
//! Simulates an IMAP server entirely in process. Used by the test suites and
//! as a reference for what the object model expects from a real transport.
//!
//! The handle is cheap to clone; clones share the same server state, so a
//! test can keep one clone for seeding and inspection while the other is
//! owned by a [`crate::Server`].

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use super::eval::{self, Candidate};
use super::{
    AclEntry, FetchItem, FetchRecord, MailboxInfo, MailboxStatus, Protocol, Quota, SortField,
    SortKey, StatusItem, StoreOp, Transport,
};
use crate::models::headers::{parse_header_block, select_header_fields, split_message};
use crate::models::{Flag, SequenceSet, Uid};

/// Hierarchy delimiter used by the simulated server
const DELIMITER: char = '/';

/// Default storage quota, in KiB
const DEFAULT_QUOTA_KIB: u64 = 1024 * 1024;

/// One command received by the simulated server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Command name, e.g. `SELECT` or `UID STORE`
    pub command: String,
    /// Mailbox the command applied to (the selected one for
    /// selection-scoped commands)
    pub mailbox: Option<String>,
    /// Number of message ids carried by the command
    pub ids: usize,
    /// Thread that issued the command
    pub thread: ThreadId,
}

/// A message to preload into a mailbox
#[derive(Debug, Clone)]
pub struct SeedMessage {
    pub raw: Vec<u8>,
    pub flags: Vec<Flag>,
    pub internal_date: DateTime<Utc>,
}

impl SeedMessage {
    /// Wrap an already-formatted RFC 822 message
    pub fn raw(raw: impl Into<Vec<u8>>) -> Self {
        Self {
            raw: raw.into(),
            flags: Vec::new(),
            internal_date: Utc::now(),
        }
    }

    /// Compose a minimal plain-text message
    pub fn compose(from: &str, to: &str, subject: &str, body: &str) -> Self {
        let raw = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain\r\n\r\n{}",
            from, to, subject, body
        );
        Self::raw(raw)
    }

    pub fn with_flags(mut self, flags: Vec<Flag>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.internal_date = date;
        self
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    uid: u32,
    flags: BTreeSet<Flag>,
    internal_date: DateTime<Utc>,
    raw: Vec<u8>,
}

impl StoredMessage {
    fn headers(&self) -> HashMap<String, String> {
        parse_header_block(split_message(&self.raw).0)
    }

    fn body(&self) -> &[u8] {
        split_message(&self.raw).1
    }
}

#[derive(Debug)]
struct StoredMailbox {
    uid_validity: u32,
    uid_next: u32,
    subscribed: bool,
    messages: Vec<StoredMessage>,
}

impl StoredMailbox {
    fn new(uid_validity: u32) -> Self {
        Self {
            uid_validity,
            uid_next: 1,
            subscribed: false,
            messages: Vec::new(),
        }
    }

    fn insert(&mut self, raw: Vec<u8>, flags: BTreeSet<Flag>, internal_date: DateTime<Utc>) -> u32 {
        let uid = self.uid_next;
        self.uid_next += 1;
        self.messages.push(StoredMessage {
            uid,
            flags,
            internal_date,
            raw,
        });
        uid
    }

    fn status(&self) -> MailboxStatus {
        MailboxStatus {
            exists: self.messages.len() as u32,
            recent: self
                .messages
                .iter()
                .filter(|m| m.flags.contains(&Flag::Recent))
                .count() as u32,
            unseen: Some(
                self.messages
                    .iter()
                    .filter(|m| !m.flags.contains(&Flag::Seen))
                    .count() as u32,
            ),
            uid_next: Some(self.uid_next),
            uid_validity: Some(self.uid_validity),
        }
    }
}

struct State {
    mailboxes: BTreeMap<String, StoredMailbox>,
    selected: Option<String>,
    capabilities: Vec<String>,
    users: HashMap<String, String>,
    authenticated: Option<String>,
    logged_out: bool,
    next_uid_validity: u32,
    quota_kib: u64,
    calls: Vec<Call>,
    /// command -> calls remaining until the injected failure
    failures: HashMap<String, usize>,
}

impl State {
    fn record(&mut self, command: &str, mailbox: Option<String>, ids: usize) -> Result<()> {
        self.calls.push(Call {
            command: command.to_string(),
            mailbox,
            ids,
            thread: thread::current().id(),
        });

        if let Some(remaining) = self.failures.get_mut(command) {
            if *remaining <= 1 {
                self.failures.remove(command);
                bail!("NO {} failed (injected)", command);
            }
            *remaining -= 1;
        }

        if self.logged_out && command != "LOGOUT" {
            bail!("Connection closed");
        }
        Ok(())
    }

    fn mailbox(&self, name: &str) -> Result<&StoredMailbox> {
        self.mailboxes
            .get(name)
            .ok_or_else(|| anyhow!("NO [NONEXISTENT] Mailbox does not exist: {}", name))
    }

    fn mailbox_mut(&mut self, name: &str) -> Result<&mut StoredMailbox> {
        self.mailboxes
            .get_mut(name)
            .ok_or_else(|| anyhow!("NO [NONEXISTENT] Mailbox does not exist: {}", name))
    }

    fn selected_name(&self) -> Result<String> {
        self.selected
            .clone()
            .ok_or_else(|| anyhow!("BAD No mailbox selected"))
    }

    fn selected_mut(&mut self) -> Result<&mut StoredMailbox> {
        let name = self.selected_name()?;
        self.mailbox_mut(&name)
    }

    fn create(&mut self, name: &str) -> Result<()> {
        if self.mailboxes.contains_key(name) {
            bail!("NO [ALREADYEXISTS] Mailbox already exists: {}", name);
        }
        let validity = self.next_uid_validity;
        self.next_uid_validity += 1;
        self.mailboxes
            .insert(name.to_string(), StoredMailbox::new(validity));
        Ok(())
    }

    fn search_selected(&self, criteria: &[String]) -> Result<Vec<(u32, &StoredMessage)>> {
        let name = self.selected_name()?;
        let mailbox = self.mailbox(&name)?;
        let exists = mailbox.messages.len() as u32;
        let key = eval::parse(criteria, exists)?;

        let mut hits = Vec::new();
        for (i, message) in mailbox.messages.iter().enumerate() {
            let seq = i as u32 + 1;
            let flags: Vec<Flag> = message.flags.iter().cloned().collect();
            let candidate = Candidate {
                seq,
                exists,
                flags: &flags,
                internal_date: message.internal_date.date_naive(),
                headers: message.headers(),
                body: String::from_utf8_lossy(message.body()).into_owned(),
            };
            if key.matches(&candidate) {
                hits.push((seq, message));
            }
        }
        Ok(hits)
    }
}

/// Build the FETCH response for one stored message
fn fetch_record(seq: u32, message: &StoredMessage, items: &[FetchItem]) -> FetchRecord {
    let mut record = FetchRecord {
        seq,
        ..Default::default()
    };

    for item in items {
        match item {
            FetchItem::Uid => record.uid = Some(Uid(message.uid)),
            FetchItem::Flags => record.flags = Some(message.flags.iter().cloned().collect()),
            FetchItem::Size => record.size = Some(message.raw.len() as u32),
            FetchItem::InternalDate => record.internal_date = Some(message.internal_date),
            FetchItem::HeaderFields(names) => {
                let head = split_message(&message.raw).0;
                record.header = Some(select_header_fields(head, names));
            }
            FetchItem::Rfc822 => record.rfc822 = Some(message.raw.clone()),
            FetchItem::Text => record.text = Some(message.body().to_vec()),
        }
    }

    record
}

/// Match a LIST pattern: `*` matches anything, `%` anything but the delimiter
fn glob_match(pattern: &[char], name: &[char]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some(('*', rest)) => (0..=name.len()).any(|i| glob_match(rest, &name[i..])),
        Some(('%', rest)) => (0..=name.len())
            .take_while(|&i| i == 0 || name[i - 1] != DELIMITER)
            .any(|i| glob_match(rest, &name[i..])),
        Some((c, rest)) => name
            .split_first()
            .is_some_and(|(n, name_rest)| n == c && glob_match(rest, name_rest)),
    }
}

/// In-process implementation of [`Transport`]
#[derive(Clone)]
pub struct InMemoryTransport {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// A server with an empty INBOX accepting PLAIN and LOGIN for any user
    pub fn new() -> Self {
        let mut state = State {
            mailboxes: BTreeMap::new(),
            selected: None,
            capabilities: vec![
                "IMAP4rev1".to_string(),
                "AUTH=PLAIN".to_string(),
                "AUTH=LOGIN".to_string(),
                "QUOTA".to_string(),
                "ACL".to_string(),
                "SORT".to_string(),
            ],
            users: HashMap::new(),
            authenticated: None,
            logged_out: false,
            next_uid_validity: 1,
            quota_kib: DEFAULT_QUOTA_KIB,
            calls: Vec::new(),
            failures: HashMap::new(),
        };
        // INBOX always exists on a fresh server
        let _ = state.create("INBOX");

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the advertised capability list
    pub fn with_capabilities(self, capabilities: &[&str]) -> Self {
        self.lock().capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Only accept this username/password pair
    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.lock()
            .users
            .insert(username.to_string(), password.to_string());
        self
    }

    /// Create a mailbox without going through the command log
    pub fn add_mailbox(&self, name: &str) -> Result<()> {
        self.lock().create(name)
    }

    /// Preload a message; returns its UID
    pub fn seed(&self, mailbox: &str, message: SeedMessage) -> Result<Uid> {
        let mut state = self.lock();
        let target = state.mailbox_mut(mailbox)?;
        let uid = target.insert(
            message.raw,
            message.flags.into_iter().collect(),
            message.internal_date,
        );
        Ok(Uid(uid))
    }

    /// All commands received so far
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of received commands with the given name
    pub fn count_calls(&self, command: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.command == command)
            .count()
    }

    /// Make the `n`th subsequent call (1-based) of `command` fail
    pub fn fail_nth(&self, command: &str, n: usize) {
        self.lock().failures.insert(command.to_string(), n.max(1));
    }

    /// UIDs and flags of every message in a mailbox, in sequence order
    pub fn contents(&self, mailbox: &str) -> Vec<(Uid, Vec<Flag>)> {
        let state = self.lock();
        state
            .mailboxes
            .get(mailbox)
            .map(|m| {
                m.messages
                    .iter()
                    .map(|msg| (Uid(msg.uid), msg.flags.iter().cloned().collect()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Subject headers of every message in a mailbox, in sequence order
    pub fn subjects(&self, mailbox: &str) -> Vec<String> {
        let state = self.lock();
        state
            .mailboxes
            .get(mailbox)
            .map(|m| {
                m.messages
                    .iter()
                    .map(|msg| msg.headers().remove("subject").unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn mailbox_names(&self) -> Vec<String> {
        self.lock().mailboxes.keys().cloned().collect()
    }

    pub fn is_subscribed(&self, mailbox: &str) -> bool {
        self.lock()
            .mailboxes
            .get(mailbox)
            .is_some_and(|m| m.subscribed)
    }

    /// Currently selected mailbox on the simulated session
    pub fn selected(&self) -> Option<String> {
        self.lock().selected.clone()
    }

    pub fn is_logged_out(&self) -> bool {
        self.lock().logged_out
    }

    pub fn authenticated_user(&self) -> Option<String> {
        self.lock().authenticated.clone()
    }
}

impl Transport for InMemoryTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Imap
    }

    fn capabilities(&mut self) -> Result<Vec<String>> {
        let mut state = self.lock();
        state.record("CAPABILITY", None, 0)?;
        Ok(state.capabilities.clone())
    }

    fn authenticate(&mut self, mechanism: &str, username: &str, password: &str) -> Result<()> {
        let mut state = self.lock();
        state.record("AUTHENTICATE", None, 0)?;

        let wanted = format!("AUTH={}", mechanism);
        if !state
            .capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&wanted))
        {
            bail!("NO Unsupported authentication mechanism {}", mechanism);
        }
        if !state.users.is_empty()
            && state.users.get(username).map(String::as_str) != Some(password)
        {
            bail!("NO [AUTHENTICATIONFAILED] Invalid credentials");
        }
        state.authenticated = Some(username.to_string());
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.record("LOGOUT", None, 0)?;
        state.logged_out = true;
        state.selected = None;
        Ok(())
    }

    fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<MailboxInfo>> {
        let mut state = self.lock();
        state.record("LIST", None, 0)?;

        let full: Vec<char> = format!("{}{}", reference, pattern).chars().collect();
        Ok(state
            .mailboxes
            .iter()
            .filter(|(name, _)| {
                let name: Vec<char> = name.chars().collect();
                glob_match(&full, &name)
            })
            .map(|(name, mailbox)| MailboxInfo {
                name: name.clone(),
                delimiter: Some(DELIMITER),
                attributes: if mailbox.subscribed {
                    vec!["\\Subscribed".to_string()]
                } else {
                    Vec::new()
                },
            })
            .collect())
    }

    fn create(&mut self, mailbox: &str) -> Result<()> {
        let mut state = self.lock();
        state.record("CREATE", Some(mailbox.to_string()), 0)?;
        state.create(mailbox)
    }

    fn delete(&mut self, mailbox: &str) -> Result<()> {
        let mut state = self.lock();
        state.record("DELETE", Some(mailbox.to_string()), 0)?;
        if mailbox.eq_ignore_ascii_case("INBOX") {
            bail!("NO Cannot delete INBOX");
        }
        state.mailbox(mailbox)?;
        state.mailboxes.remove(mailbox);
        if state.selected.as_deref() == Some(mailbox) {
            state.selected = None;
        }
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let mut state = self.lock();
        state.record("RENAME", Some(from.to_string()), 0)?;
        if state.mailboxes.contains_key(to) {
            bail!("NO [ALREADYEXISTS] Mailbox already exists: {}", to);
        }
        let mailbox = state
            .mailboxes
            .remove(from)
            .ok_or_else(|| anyhow!("NO [NONEXISTENT] Mailbox does not exist: {}", from))?;
        state.mailboxes.insert(to.to_string(), mailbox);
        if state.selected.as_deref() == Some(from) {
            state.selected = Some(to.to_string());
        }
        Ok(())
    }

    fn subscribe(&mut self, mailbox: &str) -> Result<()> {
        let mut state = self.lock();
        state.record("SUBSCRIBE", Some(mailbox.to_string()), 0)?;
        state.mailbox_mut(mailbox)?.subscribed = true;
        Ok(())
    }

    fn unsubscribe(&mut self, mailbox: &str) -> Result<()> {
        let mut state = self.lock();
        state.record("UNSUBSCRIBE", Some(mailbox.to_string()), 0)?;
        if let Some(m) = state.mailboxes.get_mut(mailbox) {
            m.subscribed = false;
        }
        Ok(())
    }

    fn status(&mut self, mailbox: &str, _items: &[StatusItem]) -> Result<MailboxStatus> {
        let mut state = self.lock();
        state.record("STATUS", Some(mailbox.to_string()), 0)?;
        Ok(state.mailbox(mailbox)?.status())
    }

    fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        let mut state = self.lock();
        state.record("SELECT", Some(mailbox.to_string()), 0)?;
        let status = state.mailbox(mailbox)?.status();
        state.selected = Some(mailbox.to_string());
        Ok(status)
    }

    fn search(&mut self, criteria: &[String]) -> Result<Vec<u32>> {
        let mut state = self.lock();
        let selected = state.selected.clone();
        state.record("SEARCH", selected, 0)?;
        Ok(state
            .search_selected(criteria)?
            .into_iter()
            .map(|(seq, _)| seq)
            .collect())
    }

    fn fetch(&mut self, set: &SequenceSet, items: &[FetchItem]) -> Result<Vec<FetchRecord>> {
        let mut state = self.lock();
        let selected = state.selected.clone();
        state.record("FETCH", selected, set.len())?;

        let name = state.selected_name()?;
        let mailbox = state.mailbox(&name)?;
        Ok(mailbox
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| (i as u32 + 1, m))
            .filter(|(seq, _)| set.contains(*seq))
            .map(|(seq, m)| fetch_record(seq, m, items))
            .collect())
    }

    fn uid_fetch(&mut self, set: &SequenceSet, items: &[FetchItem]) -> Result<Vec<FetchRecord>> {
        let mut state = self.lock();
        let selected = state.selected.clone();
        state.record("UID FETCH", selected, set.len())?;

        let name = state.selected_name()?;
        let mailbox = state.mailbox(&name)?;
        Ok(mailbox
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| set.contains(m.uid))
            .map(|(i, m)| {
                let mut record = fetch_record(i as u32 + 1, m, items);
                record.uid = Some(Uid(m.uid));
                record
            })
            .collect())
    }

    fn uid_store(&mut self, set: &SequenceSet, op: StoreOp, flags: &[Flag]) -> Result<()> {
        let mut state = self.lock();
        let selected = state.selected.clone();
        state.record("UID STORE", selected, set.len())?;

        let mailbox = state.selected_mut()?;
        for message in mailbox.messages.iter_mut().filter(|m| set.contains(m.uid)) {
            match op {
                StoreOp::Add => message.flags.extend(flags.iter().cloned()),
                StoreOp::Remove => {
                    for flag in flags {
                        message.flags.remove(flag);
                    }
                }
                StoreOp::Replace => {
                    let recent = message.flags.contains(&Flag::Recent);
                    message.flags = flags.iter().cloned().collect();
                    if recent {
                        message.flags.insert(Flag::Recent);
                    }
                }
            }
        }
        Ok(())
    }

    fn uid_copy(&mut self, set: &SequenceSet, destination: &str) -> Result<()> {
        let mut state = self.lock();
        let selected = state.selected.clone();
        state.record("UID COPY", selected, set.len())?;

        let name = state.selected_name()?;
        if !state.mailboxes.contains_key(destination) {
            bail!("NO [TRYCREATE] Mailbox does not exist: {}", destination);
        }
        let copies: Vec<StoredMessage> = state
            .mailbox(&name)?
            .messages
            .iter()
            .filter(|m| set.contains(m.uid))
            .cloned()
            .collect();

        let target = state.mailbox_mut(destination)?;
        for message in copies {
            let mut flags = message.flags;
            flags.insert(Flag::Recent);
            target.insert(message.raw, flags, message.internal_date);
        }
        Ok(())
    }

    fn append(
        &mut self,
        mailbox: &str,
        raw: &[u8],
        flags: &[Flag],
        date: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.lock();
        state.record("APPEND", Some(mailbox.to_string()), 1)?;

        let target = state
            .mailboxes
            .get_mut(mailbox)
            .ok_or_else(|| anyhow!("NO [TRYCREATE] Mailbox does not exist: {}", mailbox))?;
        let mut flags: BTreeSet<Flag> = flags.iter().cloned().collect();
        flags.insert(Flag::Recent);
        target.insert(raw.to_vec(), flags, date);
        Ok(())
    }

    fn expunge(&mut self) -> Result<()> {
        let mut state = self.lock();
        let selected = state.selected.clone();
        state.record("EXPUNGE", selected, 0)?;
        state
            .selected_mut()?
            .messages
            .retain(|m| !m.flags.contains(&Flag::Deleted));
        Ok(())
    }

    fn check(&mut self) -> Result<()> {
        let mut state = self.lock();
        let selected = state.selected.clone();
        state.record("CHECK", selected, 0)?;
        state.selected_name().map(|_| ())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        let selected = state.selected.clone();
        state.record("CLOSE", selected, 0)?;
        state
            .selected_mut()?
            .messages
            .retain(|m| !m.flags.contains(&Flag::Deleted));
        state.selected = None;
        Ok(())
    }

    fn get_quota_root(&mut self, mailbox: &str) -> Result<Vec<Quota>> {
        let mut state = self.lock();
        state.record("GETQUOTAROOT", Some(mailbox.to_string()), 0)?;
        state.mailbox(mailbox)?;

        let bytes: usize = state
            .mailboxes
            .values()
            .flat_map(|m| m.messages.iter())
            .map(|m| m.raw.len())
            .sum();
        Ok(vec![Quota {
            root: String::new(),
            resource: "STORAGE".to_string(),
            usage: (bytes as u64).div_ceil(1024),
            limit: state.quota_kib,
        }])
    }

    fn get_acl(&mut self, mailbox: &str) -> Result<Vec<AclEntry>> {
        let mut state = self.lock();
        state.record("GETACL", Some(mailbox.to_string()), 0)?;
        state.mailbox(mailbox)?;
        Ok(vec![AclEntry {
            identifier: state
                .authenticated
                .clone()
                .unwrap_or_else(|| "owner".to_string()),
            rights: "lrswipkxtecda".to_string(),
        }])
    }

    fn sort(&mut self, keys: &[SortKey], criteria: &[String], charset: &str) -> Result<Vec<u32>> {
        let mut state = self.lock();
        let selected = state.selected.clone();
        state.record("SORT", selected, 0)?;

        if !charset.eq_ignore_ascii_case("UTF-8") && !charset.eq_ignore_ascii_case("US-ASCII") {
            bail!("NO [BADCHARSET] Unsupported charset {}", charset);
        }

        let mut hits = state.search_selected(criteria)?;
        hits.sort_by(|(seq_a, a), (seq_b, b)| {
            let (headers_a, headers_b) = (a.headers(), b.headers());
            keys.iter()
                .map(|key| {
                    let ordering = match key.field() {
                        SortField::Arrival => seq_a.cmp(seq_b),
                        SortField::Date => a.internal_date.cmp(&b.internal_date),
                        SortField::Subject => {
                            let sa = headers_a.get("subject").map(|s| s.to_lowercase());
                            let sb = headers_b.get("subject").map(|s| s.to_lowercase());
                            sa.cmp(&sb)
                        }
                        SortField::From => {
                            let fa = headers_a.get("from").map(|s| s.to_lowercase());
                            let fb = headers_b.get("from").map(|s| s.to_lowercase());
                            fa.cmp(&fb)
                        }
                        SortField::Size => a.raw.len().cmp(&b.raw.len()),
                    };
                    if key.is_reverse() {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                })
                .find(|o| o.is_ne())
                .unwrap_or_else(|| seq_a.cmp(seq_b))
        });

        Ok(hits.into_iter().map(|(seq, _)| seq).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(&chars("*"), &chars("INBOX/Lists/rust")));
        assert!(glob_match(&chars("INBOX/%"), &chars("INBOX/Lists")));
        assert!(!glob_match(&chars("INBOX/%"), &chars("INBOX/Lists/rust")));
        assert!(glob_match(&chars("INBOX/*"), &chars("INBOX/Lists/rust")));
        assert!(glob_match(&chars("Deleted Items"), &chars("Deleted Items")));
        assert!(!glob_match(&chars("Deleted"), &chars("Deleted Items")));
    }

    #[test]
    fn test_select_and_fetch() {
        let server = InMemoryTransport::new();
        server
            .seed("INBOX", SeedMessage::compose("a@x.org", "b@x.org", "Hi", "body"))
            .unwrap();

        let mut transport = server.clone();
        let status = transport.select("INBOX").unwrap();
        assert_eq!(status.exists, 1);

        let records = transport
            .fetch(
                &SequenceSet::range(1, 1),
                &[FetchItem::Uid, FetchItem::HeaderFields(vec!["Subject".into()])],
            )
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].uid, Some(Uid(1)));
        assert_eq!(records[0].header.as_deref(), Some(&b"Subject: Hi\r\n\r\n"[..]));
    }

    #[test]
    fn test_search_matches_decoded_subject() {
        let server = InMemoryTransport::new();
        server
            .seed(
                "INBOX",
                SeedMessage::raw("Subject: =?UTF-8?B?SW52b2ljZQ==?=\r\n\r\nbody"),
            )
            .unwrap();

        let mut transport = server.clone();
        transport.select("INBOX").unwrap();
        let hits = transport
            .search(&["SUBJECT".to_string(), "invoice".to_string()])
            .unwrap();
        assert_eq!(hits, vec![1]);
        assert_eq!(server.subjects("INBOX"), vec!["Invoice"]);
    }

    #[test]
    fn test_fetch_without_selection_fails() {
        let mut transport = InMemoryTransport::new();
        assert!(transport.fetch(&SequenceSet::range(1, 1), &[FetchItem::Uid]).is_err());
    }

    #[test]
    fn test_copy_and_expunge() {
        let server = InMemoryTransport::new();
        server.add_mailbox("Archive").unwrap();
        let uid = server
            .seed("INBOX", SeedMessage::compose("a@x.org", "b@x.org", "Hi", "body"))
            .unwrap();

        let mut transport = server.clone();
        transport.select("INBOX").unwrap();
        transport
            .uid_copy(&SequenceSet::from_uids(&[uid]), "Archive")
            .unwrap();
        transport
            .uid_store(&SequenceSet::from_uids(&[uid]), StoreOp::Add, &[Flag::Deleted])
            .unwrap();
        transport.expunge().unwrap();

        assert!(server.contents("INBOX").is_empty());
        assert_eq!(server.contents("Archive").len(), 1);
    }

    #[test]
    fn test_injected_failure() {
        let server = InMemoryTransport::new();
        server.fail_nth("SELECT", 2);

        let mut transport = server.clone();
        assert!(transport.select("INBOX").is_ok());
        assert!(transport.select("INBOX").is_err());
        assert!(transport.select("INBOX").is_ok());
    }

    #[test]
    fn test_authenticate_checks_credentials() {
        let mut transport = InMemoryTransport::new().with_user("alice", "secret");
        assert!(transport.authenticate("PLAIN", "alice", "wrong").is_err());
        assert!(transport.authenticate("CRAM-MD5", "alice", "secret").is_err());
        assert!(transport.authenticate("PLAIN", "alice", "secret").is_ok());
    }

    #[test]
    fn test_sort_by_reverse_size() {
        let server = InMemoryTransport::new();
        server
            .seed("INBOX", SeedMessage::compose("a@x.org", "b@x.org", "small", "x"))
            .unwrap();
        server
            .seed("INBOX", SeedMessage::compose("a@x.org", "b@x.org", "large", "xxxxxxxxxx"))
            .unwrap();

        let mut transport = server.clone();
        transport.select("INBOX").unwrap();
        let sorted = transport
            .sort(&[SortKey::Reverse(SortField::Size)], &["ALL".to_string()], "UTF-8")
            .unwrap();
        assert_eq!(sorted, vec![2, 1]);
        assert!(transport.sort(&[SortKey::Size], &[], "KOI8-R").is_err());
    }
}
