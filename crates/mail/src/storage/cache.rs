//! Per-mailbox result cache
//!
//! Maps a filter to the ordered message handles it resolved to. Keys are the
//! filters themselves, so only structurally equal filters share an entry. Entries are never revalidated on their own: remote state
//! changes out of band, so callers refresh explicitly.

use anyhow::Result;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::account::Message;
use crate::query::Filter;

/// Cached filter results for one mailbox
#[derive(Default)]
pub struct MessageCache {
    entries: Mutex<HashMap<Filter, Vec<Arc<Message>>>>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Filter, Vec<Arc<Message>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached result for `filter`, if any
    pub fn get(&self, filter: &Filter) -> Option<Vec<Arc<Message>>> {
        self.lock().get(filter).cloned()
    }

    /// Return the cached result for `filter`, loading and storing it on a miss
    ///
    /// The lock is not held while loading. If two callers race on the same
    /// filter, the first stored result wins and both see it.
    pub fn get_or_load(
        &self,
        filter: &Filter,
        load: impl FnOnce() -> Result<Vec<Arc<Message>>>,
    ) -> Result<Vec<Arc<Message>>> {
        if let Some(hit) = self.get(filter) {
            debug!("Cache hit for {:?} ({} messages)", filter, hit.len());
            return Ok(hit);
        }

        debug!("Cache miss for {:?}", filter);
        let loaded = load()?;
        Ok(self
            .lock()
            .entry(filter.clone())
            .or_insert(loaded)
            .clone())
    }

    /// Overwrite the entry for `filter`
    pub fn store(&self, filter: &Filter, messages: Vec<Arc<Message>>) -> Vec<Arc<Message>> {
        self.lock().insert(filter.clone(), messages.clone());
        messages
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.lock().clear();
    }
}
