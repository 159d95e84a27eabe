//! Per-connection mutual exclusion and mailbox selection
//!
//! A [`ConnectionGuard`] owns the transport of one live session. Every
//! operation that needs a particular mailbox to be the active one goes
//! through [`ConnectionGuard::with_selection`], which holds the lock for the
//! whole select-then-operate sequence. Two guards never share a lock, so
//! independent logins run fully concurrently.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use log::{debug, info, warn};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{Flag, SequenceSet, Uid};
use crate::transport::{
    FetchItem, FetchRecord, MailboxStatus, Protocol, SortKey, StatusItem, StoreOp, Transport,
};

struct Session {
    transport: Box<dyn Transport>,
    /// Mailbox selected by the last successful SELECT
    selected: Option<String>,
    episode: u64,
    connected: bool,
}

/// The lock and selection state of one physical connection
pub struct ConnectionGuard {
    session: Mutex<Session>,
    protocol: Protocol,
    slice_size: usize,
}

impl ConnectionGuard {
    pub fn new(transport: Box<dyn Transport>, slice_size: usize) -> Self {
        let protocol = transport.protocol();
        Self {
            session: Mutex::new(Session {
                transport,
                selected: None,
                episode: 0,
                connected: true,
            }),
            protocol,
            slice_size: slice_size.max(1),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Maximum number of identifiers per round trip
    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    /// Whether two guards are the same physical connection
    pub fn same_connection(a: &Arc<Self>, b: &Arc<Self>) -> bool {
        Arc::ptr_eq(a, b)
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        match self.session.lock() {
            Ok(session) => session,
            Err(poisoned) => {
                warn!("Connection lock was poisoned by a panicking operation; forgetting selection");
                let mut session = poisoned.into_inner();
                session.selected = None;
                self.session.clear_poison();
                session
            }
        }
    }

    fn lock_connected(&self) -> Result<MutexGuard<'_, Session>> {
        let session = self.lock();
        if !session.connected {
            bail!("Connection is closed");
        }
        Ok(session)
    }

    /// Run a connection-scoped command that needs no selected mailbox
    pub fn with_transport<T>(
        &self,
        body: impl FnOnce(&mut dyn Transport) -> Result<T>,
    ) -> Result<T> {
        let mut session = self.lock_connected()?;
        body(session.transport.as_mut())
    }

    /// Select `mailbox` and run `body` while holding the connection lock
    ///
    /// SELECT is issued on every call; the lock is released on every exit
    /// path, including errors and panics inside `body`. Sequence numbers
    /// handed out by the [`Selection`] cannot outlive the call.
    pub fn with_selection<T>(
        &self,
        mailbox: &str,
        body: impl for<'s> FnOnce(&mut Selection<'s>) -> Result<T>,
    ) -> Result<T> {
        let mut session = self.lock_connected()?;

        let status = match session.transport.select(mailbox) {
            Ok(status) => status,
            Err(e) => {
                session.selected = None;
                return Err(e.context(format!("Failed to select mailbox {}", mailbox)));
            }
        };
        session.selected = Some(mailbox.to_string());
        session.episode += 1;
        debug!(
            "Selected {} (episode {}, {} messages)",
            mailbox, session.episode, status.exists
        );

        let mut selection = Selection {
            session: &mut *session,
            mailbox: mailbox.to_string(),
            status,
            slice_size: self.slice_size,
            _episode: PhantomData,
        };
        body(&mut selection)
    }

    /// Mailbox currently selected on this connection, if any
    pub fn selected(&self) -> Option<String> {
        self.lock().selected.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Log out and mark the connection closed
    pub fn disconnect(&self) -> Result<()> {
        let mut session = self.lock();
        if !session.connected {
            return Ok(());
        }
        session.connected = false;
        session.selected = None;
        info!("Logging out");
        session.transport.logout().context("Logout failed")
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.is_connected()
            && let Err(e) = self.disconnect()
        {
            warn!("Logout on drop failed: {:#}", e);
        }
    }
}

/// A message sequence number, valid only inside the selection that
/// produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Msn<'s> {
    seq: u32,
    _episode: PhantomData<fn(&'s ()) -> &'s ()>,
}

impl Msn<'_> {
    pub fn get(self) -> u32 {
        self.seq
    }
}

/// One selection episode: the selected mailbox plus exclusive use of the
/// transport
pub struct Selection<'s> {
    session: &'s mut Session,
    mailbox: String,
    status: MailboxStatus,
    slice_size: usize,
    _episode: PhantomData<fn(&'s ()) -> &'s ()>,
}

impl<'s> Selection<'s> {
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Counters reported by SELECT
    pub fn status(&self) -> &MailboxStatus {
        &self.status
    }

    /// Number of messages in the selected mailbox
    pub fn exists(&self) -> u32 {
        self.status.exists
    }

    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    fn transport(&mut self) -> &mut dyn Transport {
        self.session.transport.as_mut()
    }

    fn msns(seqs: Vec<u32>) -> Vec<Msn<'s>> {
        seqs.into_iter()
            .map(|seq| Msn {
                seq,
                _episode: PhantomData,
            })
            .collect()
    }

    /// SEARCH the selected mailbox
    pub fn search(&mut self, criteria: &[String]) -> Result<Vec<Msn<'s>>> {
        let seqs = self.transport().search(criteria)?;
        debug!("SEARCH {} -> {} hits", criteria.join(" "), seqs.len());
        Ok(Self::msns(seqs))
    }

    /// SORT the selected mailbox
    pub fn sort(&mut self, keys: &[SortKey], criteria: &[String]) -> Result<Vec<Msn<'s>>> {
        let seqs = self.transport().sort(keys, criteria, "UTF-8")?;
        Ok(Self::msns(seqs))
    }

    /// FETCH the given sequence numbers, one round trip per slice
    pub fn fetch(&mut self, msns: &[Msn<'s>], items: &[FetchItem]) -> Result<Vec<FetchRecord>> {
        let set = SequenceSet::from_ids(msns.iter().map(|m| m.seq));
        self.fetch_set(&set, items)
    }

    /// FETCH an inclusive ordinal range, one round trip per slice
    pub fn fetch_range(
        &mut self,
        start: u32,
        end: u32,
        items: &[FetchItem],
    ) -> Result<Vec<FetchRecord>> {
        let set = SequenceSet::range(start, end.min(self.status.exists));
        self.fetch_set(&set, items)
    }

    fn fetch_set(&mut self, set: &SequenceSet, items: &[FetchItem]) -> Result<Vec<FetchRecord>> {
        let mut records = Vec::with_capacity(set.len());
        for slice in set.slices(self.slice_size) {
            debug!("FETCH {} ({} ids)", slice, slice.len());
            records.extend(self.transport().fetch(&slice, items)?);
        }
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }

    /// UID FETCH, one round trip per slice
    pub fn uid_fetch(&mut self, uids: &[Uid], items: &[FetchItem]) -> Result<Vec<FetchRecord>> {
        let set = SequenceSet::from_uids(uids);
        let mut records = Vec::with_capacity(uids.len());
        for slice in set.slices(self.slice_size) {
            records.extend(self.transport().uid_fetch(&slice, items)?);
        }
        Ok(records)
    }

    /// One UID STORE round trip; callers slice
    pub fn uid_store(&mut self, set: &SequenceSet, op: StoreOp, flags: &[Flag]) -> Result<()> {
        self.transport().uid_store(set, op, flags)
    }

    /// One UID COPY round trip into `destination`; callers slice
    pub fn uid_copy(&mut self, set: &SequenceSet, destination: &str) -> Result<()> {
        self.transport().uid_copy(set, destination)
    }

    /// APPEND into the selected mailbox
    pub fn append(&mut self, raw: &[u8], flags: &[Flag]) -> Result<()> {
        let mailbox = self.mailbox.clone();
        self.transport().append(&mailbox, raw, flags, Utc::now())
    }

    /// STATUS of the selected mailbox
    pub fn refresh_status(&mut self, items: &[StatusItem]) -> Result<MailboxStatus> {
        let mailbox = self.mailbox.clone();
        let status = self.transport().status(&mailbox, items)?;
        self.status = status.clone();
        Ok(status)
    }

    pub fn expunge(&mut self) -> Result<()> {
        self.transport().expunge()
    }

    pub fn check(&mut self) -> Result<()> {
        self.transport().check()
    }

    /// CLOSE the mailbox, ending this selection on the connection
    pub fn close(&mut self) -> Result<()> {
        self.session.selected = None;
        self.transport().close()
    }
}
