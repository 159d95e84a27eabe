//! Mailbox handles
//!
//! Every operation that needs the mailbox selected runs inside
//! [`ConnectionGuard::with_selection`] on the shared connection. Resolved
//! filter results are cached per mailbox until explicitly refreshed.

use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::message::Message;
use crate::actions::{self, Action, Batch, BatchReport, Selector};
use crate::connection::{ConnectionGuard, Selection};
use crate::models::Flag;
use crate::models::headers::parse_header_block;
use crate::query::{self, CompiledQuery, Filter, MessageView};
use crate::storage::MessageCache;
use crate::transport::{AclEntry, FetchItem, FetchRecord, Quota, SortKey, StatusItem};

/// Identity of a mailbox: its current name and the connection it lives on
///
/// Shared by the mailbox handle and every message resolved from it.
pub(crate) struct MailboxRef {
    name: RwLock<String>,
    guard: Arc<ConnectionGuard>,
}

impl MailboxRef {
    pub(crate) fn new(name: impl Into<String>, guard: Arc<ConnectionGuard>) -> Self {
        Self {
            name: RwLock::new(name.into()),
            guard,
        }
    }

    pub(crate) fn name(&self) -> String {
        self.name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_name(&self, name: &str) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = name.to_string();
    }

    pub(crate) fn guard(&self) -> &Arc<ConnectionGuard> {
        &self.guard
    }

    /// Same connection and same name
    pub(crate) fn same_mailbox(&self, other: &MailboxRef) -> bool {
        ConnectionGuard::same_connection(&self.guard, &other.guard) && self.name() == other.name()
    }

    /// Select this mailbox and run `body` under the connection lock
    pub(crate) fn with_selection<T>(
        &self,
        body: impl for<'s> FnOnce(&mut Selection<'s>) -> Result<T>,
    ) -> Result<T> {
        let name = self.name();
        self.guard.with_selection(&name, body)
    }
}

pub(crate) struct MailboxShared {
    identity: Arc<MailboxRef>,
    cache: MessageCache,
}

/// A named folder on the server
///
/// Cloning is cheap; clones share the name and the result cache.
#[derive(Clone)]
pub struct Mailbox {
    shared: Arc<MailboxShared>,
}

/// Fetch items requested inline when resolving a query
fn inline_items(query: &CompiledQuery) -> Vec<FetchItem> {
    let mut items = vec![
        FetchItem::Uid,
        FetchItem::Flags,
        FetchItem::Size,
        FetchItem::HeaderFields(query.header_fields()),
    ];
    if query.needs_text() {
        items.push(FetchItem::Text);
    }
    items
}

/// Second pass over fetched records: keep those every residual accepts
fn second_pass(query: &CompiledQuery, records: &[FetchRecord]) -> Vec<bool> {
    records
        .iter()
        .map(|record| {
            if query.residual.is_empty() {
                return true;
            }
            let headers = record
                .header
                .as_deref()
                .map(parse_header_block)
                .unwrap_or_default();
            let text = record
                .text
                .as_deref()
                .map(|t| String::from_utf8_lossy(t).into_owned());
            let flags = record.flags.as_deref().unwrap_or(&[]);
            query.accepts(&MessageView {
                headers: &headers,
                text: text.as_deref(),
                flags,
            })
        })
        .collect()
}

impl Mailbox {
    pub(crate) fn new(name: impl Into<String>, guard: Arc<ConnectionGuard>) -> Self {
        Self {
            shared: Arc::new(MailboxShared {
                identity: Arc::new(MailboxRef::new(name, guard)),
                cache: MessageCache::new(),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<MailboxShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<MailboxShared> {
        &self.shared
    }

    pub(crate) fn identity(&self) -> &Arc<MailboxRef> {
        &self.shared.identity
    }

    fn guard(&self) -> &Arc<ConnectionGuard> {
        self.shared.identity.guard()
    }

    pub fn name(&self) -> String {
        self.shared.identity.name()
    }

    /// Rename on the server; this handle and its messages follow the new name
    pub fn rename(&self, new_name: &str) -> Result<()> {
        let old = self.name();
        self.guard()
            .with_transport(|t| t.rename(&old, new_name))
            .with_context(|| format!("Failed to rename {} to {}", old, new_name))?;
        self.shared.identity.set_name(new_name);
        info!("Renamed mailbox {} to {}", old, new_name);
        Ok(())
    }

    pub fn subscribe(&self) -> Result<()> {
        let name = self.name();
        self.guard().with_transport(|t| t.subscribe(&name))
    }

    pub fn unsubscribe(&self) -> Result<()> {
        let name = self.name();
        self.guard().with_transport(|t| t.unsubscribe(&name))
    }

    pub fn is_subscribed(&self) -> Result<bool> {
        let name = self.name();
        let listed = self.guard().with_transport(|t| t.list("", &name))?;
        Ok(listed
            .iter()
            .any(|info| info.name == name && info.has_attribute("\\Subscribed")))
    }

    /// Delete this mailbox on the server
    pub fn delete(self) -> Result<()> {
        let name = self.name();
        self.guard()
            .with_transport(|t| t.delete(&name))
            .with_context(|| format!("Failed to delete mailbox {}", name))?;
        self.shared.cache.clear();
        info!("Deleted mailbox {}", name);
        Ok(())
    }

    /// Messages matching `filter`, from cache when this exact filter was
    /// resolved before
    pub fn messages(&self, filter: &Filter) -> Result<Vec<Arc<Message>>> {
        let query = query::compile(filter)?;
        self.shared
            .cache
            .get_or_load(filter, || self.resolve(&query))
    }

    /// Resolve `filter` again and overwrite its cache entry
    pub fn refresh(&self, filter: &Filter) -> Result<Vec<Arc<Message>>> {
        let query = query::compile(filter)?;
        let messages = self.resolve(&query)?;
        Ok(self.shared.cache.store(filter, messages))
    }

    /// Every message currently in the mailbox, bypassing the cache
    pub(crate) fn resolve_all(&self) -> Result<Vec<Arc<Message>>> {
        self.resolve(&CompiledQuery::default())
    }

    fn resolve(&self, query: &CompiledQuery) -> Result<Vec<Arc<Message>>> {
        let items = inline_items(query);
        let records = self.identity().with_selection(|sel| {
            let exists = sel.exists();
            let Some((start, end)) = query.window.bounds(exists) else {
                return Ok(Vec::new());
            };

            if !query.needs_search() {
                return sel.fetch_range(start, end, &items);
            }

            let Some(tokens) = query.search_tokens(exists) else {
                return Ok(Vec::new());
            };
            let msns = sel.search(&tokens)?;
            sel.fetch(&msns, &items)
        })?;

        let messages = self.build(query, &records);
        debug!(
            "Resolved {} of {} fetched messages in {}",
            messages.len(),
            records.len(),
            self.name()
        );
        Ok(messages)
    }

    fn build(&self, query: &CompiledQuery, records: &[FetchRecord]) -> Vec<Arc<Message>> {
        let fields = query.header_fields();
        records
            .iter()
            .zip(second_pass(query, records))
            .filter(|(_, keep)| *keep)
            .filter_map(|(record, _)| {
                Message::from_record(record, &fields, self.identity().clone())
            })
            .map(Arc::new)
            .collect()
    }

    /// Messages matching `filter`, in server-side sort order; not cached
    pub fn sort(&self, keys: &[SortKey], filter: &Filter) -> Result<Vec<Arc<Message>>> {
        let query = query::compile(filter)?;
        let items = inline_items(&query);

        let records = self.identity().with_selection(|sel| {
            let Some(tokens) = query.search_tokens(sel.exists()) else {
                return Ok(Vec::new());
            };
            let msns = sel.sort(keys, &tokens)?;
            let mut by_seq: HashMap<u32, FetchRecord> = sel
                .fetch(&msns, &items)?
                .into_iter()
                .map(|r| (r.seq, r))
                .collect();
            Ok(msns
                .iter()
                .filter_map(|m| by_seq.remove(&m.get()))
                .collect::<Vec<_>>())
        })?;

        Ok(self.build(&query, &records))
    }

    /// A STATUS counter of this mailbox
    pub fn count(&self, item: StatusItem) -> Result<u32> {
        let status = self
            .identity()
            .with_selection(|sel| sel.refresh_status(&[item]))?;
        status
            .get(item)
            .ok_or_else(|| anyhow!("Server did not report {:?} for {}", item, self.name()))
    }

    /// Append a raw RFC 822 message
    pub fn append(&self, raw: &[u8], flags: &[Flag]) -> Result<()> {
        self.identity().with_selection(|sel| sel.append(raw, flags))
    }

    /// Permanently remove messages flagged `\Deleted`
    pub fn expunge(&self) -> Result<()> {
        self.identity().with_selection(|sel| sel.expunge())
    }

    pub fn check(&self) -> Result<()> {
        self.identity().with_selection(|sel| sel.check())
    }

    /// Close the mailbox, silently expunging deleted messages
    pub fn close(&self) -> Result<()> {
        self.identity().with_selection(|sel| sel.close())
    }

    /// Apply a batch of actions with this mailbox as the destination
    pub fn batch(&self, batch: &Batch) -> Result<BatchReport> {
        actions::execute(self, batch)
    }

    /// Copy a message into this mailbox
    pub fn push(&self, message: &Arc<Message>) -> Result<()> {
        let batch = Batch::new().with(Action::Copy, Selector::Messages(vec![message.clone()]));
        self.batch(&batch).map(|_| ())
    }

    pub fn quota(&self) -> Result<Vec<Quota>> {
        let name = self.name();
        self.guard().with_transport(|t| t.get_quota_root(&name))
    }

    pub fn acls(&self) -> Result<Vec<AclEntry>> {
        let name = self.name();
        self.guard().with_transport(|t| t.get_acl(&name))
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox").field("name", &self.name()).finish()
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
