//! Batch executor for bulk message actions
//!
//! Actions run in a fixed order (read, copy, move, delete). Within an
//! action, messages are grouped by the mailbox they live in and each group
//! is handled in one selection episode of that mailbox. Every STORE or COPY
//! carries at most `slice_size` identifiers.
//!
//! Execution is not atomic. When a slice fails the remaining slices of that
//! action are abandoned, later actions are not attempted, and the slices
//! already applied stay applied; the returned [`BatchError`] says how far it
//! got.

use anyhow::Result;
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::account::{Mailbox, MailboxRef, Message};
use crate::connection::ConnectionGuard;
use crate::models::{Flag, SequenceSet, Uid};
use crate::transport::StoreOp;

/// Kind of bulk action, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    /// Set `\Seen`
    Read,
    /// Copy into the executing mailbox
    Copy,
    /// Copy into the executing mailbox, then flag the source `\Deleted`
    Move,
    /// Set `\Deleted`; removal needs a later expunge
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Read => "read",
            Action::Copy => "copy",
            Action::Move => "move",
            Action::Delete => "delete",
        })
    }
}

/// Which messages an action targets
#[derive(Debug, Clone)]
pub enum Selector {
    /// Every message currently in the executing mailbox
    All,
    Messages(Vec<Arc<Message>>),
}

impl From<Vec<Arc<Message>>> for Selector {
    fn from(messages: Vec<Arc<Message>>) -> Self {
        Selector::Messages(messages)
    }
}

impl From<Arc<Message>> for Selector {
    fn from(message: Arc<Message>) -> Self {
        Selector::Messages(vec![message])
    }
}

/// A set of actions to apply together
#[derive(Debug, Clone, Default)]
pub struct Batch {
    actions: BTreeMap<Action, Selector>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action; a repeated action replaces the earlier selector
    pub fn with(mut self, action: Action, selector: impl Into<Selector>) -> Self {
        self.actions.insert(action, selector.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> impl Iterator<Item = (Action, &Selector)> {
        self.actions.iter().map(|(a, s)| (*a, s))
    }
}

/// Outcome of a completed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Messages an action was applied to
    pub applied: usize,
    /// Messages left alone (moves into the mailbox they already live in)
    pub skipped: usize,
    /// Set operations sent to the transport
    pub slices: usize,
}

/// A batch action that failed part way through
#[derive(Debug, thiserror::Error)]
#[error("{action} aborted after {completed_slices} of {total_slices} slices")]
pub struct BatchError {
    pub action: Action,
    pub completed_slices: usize,
    pub total_slices: usize,
    #[source]
    pub source: anyhow::Error,
}

/// Messages sharing one source mailbox
struct Group {
    source: Arc<MailboxRef>,
    messages: Vec<Arc<Message>>,
}

impl Group {
    fn uids(&self) -> Vec<Uid> {
        self.messages.iter().map(|m| m.uid()).collect()
    }

    fn same_connection(&self, target: &MailboxRef) -> bool {
        ConnectionGuard::same_connection(self.source.guard(), target.guard())
    }
}

fn group_by_source(messages: &[Arc<Message>]) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for message in messages {
        match groups
            .iter_mut()
            .find(|g| g.source.same_mailbox(message.mailbox_ref()))
        {
            Some(group) => group.messages.push(message.clone()),
            None => groups.push(Group {
                source: message.mailbox_ref().clone(),
                messages: vec![message.clone()],
            }),
        }
    }
    groups
}

/// Progress through the slices of one action
struct Progress {
    action: Action,
    completed: usize,
    total: usize,
}

impl Progress {
    fn fail(&self, source: anyhow::Error) -> anyhow::Error {
        BatchError {
            action: self.action,
            completed_slices: self.completed,
            total_slices: self.total,
            source,
        }
        .into()
    }
}

/// Number of transport calls an action will take for `groups`
fn planned_slices(
    action: Action,
    groups: &[Group],
    target: &MailboxRef,
    slice_size: usize,
) -> usize {
    groups
        .iter()
        .map(|group| {
            let moving_home = action == Action::Move && group.source.same_mailbox(target);
            let cross = matches!(action, Action::Copy | Action::Move)
                && !group.same_connection(target);
            if moving_home {
                0
            } else if cross {
                group.messages.len()
            } else {
                group.messages.len().div_ceil(slice_size)
            }
        })
        .sum()
}

/// Apply `batch` with `target` as the executing mailbox
pub(crate) fn execute(target: &Mailbox, batch: &Batch) -> Result<BatchReport> {
    let mut report = BatchReport::default();

    for (action, selector) in batch.actions() {
        let messages = match selector {
            Selector::All => target.resolve_all()?,
            Selector::Messages(messages) => messages.clone(),
        };
        if messages.is_empty() {
            continue;
        }

        let groups = group_by_source(&messages);
        let slice_size = target.identity().guard().slice_size();
        let mut progress = Progress {
            action,
            completed: 0,
            total: planned_slices(action, &groups, target.identity(), slice_size),
        };
        info!(
            "Batch {} of {} messages into {} ({} slices)",
            action,
            messages.len(),
            target.name(),
            progress.total
        );

        for group in &groups {
            match action {
                Action::Read => store_flag(group, Flag::Seen, &mut progress, &mut report)?,
                Action::Delete => store_flag(group, Flag::Deleted, &mut progress, &mut report)?,
                Action::Copy => transfer(group, target, false, &mut progress, &mut report)?,
                Action::Move if group.source.same_mailbox(target.identity()) => {
                    debug!(
                        "Skipping {} messages already in {}",
                        group.messages.len(),
                        target.name()
                    );
                    report.skipped += group.messages.len();
                }
                Action::Move => transfer(group, target, true, &mut progress, &mut report)?,
            }
        }
        report.slices += progress.completed;
    }

    Ok(report)
}

/// Mark every message of `group` with `flag`, in its own mailbox
fn store_flag(
    group: &Group,
    flag: Flag,
    progress: &mut Progress,
    report: &mut BatchReport,
) -> Result<()> {
    let flags = [flag];
    group
        .source
        .with_selection(|sel| {
            for slice in SequenceSet::from_uids(&group.uids()).slices(sel.slice_size()) {
                sel.uid_store(&slice, StoreOp::Add, &flags)
                    .map_err(|e| progress.fail(e))?;
                progress.completed += 1;
                for message in group.messages.iter().filter(|m| slice.contains(m.uid().get())) {
                    message.apply_store(StoreOp::Add, &flags);
                }
            }
            Ok(())
        })
        .map_err(|e| wrap(e, progress))?;

    report.applied += group.messages.len();
    Ok(())
}

/// Copy (and for moves, delete at the source) one group into `target`
fn transfer(
    group: &Group,
    target: &Mailbox,
    delete_source: bool,
    progress: &mut Progress,
    report: &mut BatchReport,
) -> Result<()> {
    if !group.same_connection(target.identity()) {
        return transfer_across(group, target, delete_source, progress, report);
    }

    let destination = target.name();
    let deleted = [Flag::Deleted];
    group
        .source
        .with_selection(|sel| {
            for slice in SequenceSet::from_uids(&group.uids()).slices(sel.slice_size()) {
                sel.uid_copy(&slice, &destination)
                    .map_err(|e| progress.fail(e))?;
                if delete_source {
                    sel.uid_store(&slice, StoreOp::Add, &deleted)
                        .map_err(|e| progress.fail(e))?;
                    for message in group.messages.iter().filter(|m| slice.contains(m.uid().get())) {
                        message.apply_store(StoreOp::Add, &deleted);
                    }
                }
                progress.completed += 1;
            }
            Ok(())
        })
        .map_err(|e| wrap(e, progress))?;

    report.applied += group.messages.len();
    Ok(())
}

/// Messages on another connection: fetch each one and append it
fn transfer_across(
    group: &Group,
    target: &Mailbox,
    delete_source: bool,
    progress: &mut Progress,
    report: &mut BatchReport,
) -> Result<()> {
    for message in &group.messages {
        let step = || -> Result<()> {
            let raw = message.raw()?;
            let flags: Vec<Flag> = message
                .flags()?
                .into_iter()
                .filter(|f| *f != Flag::Recent)
                .collect();
            target.append(&raw, &flags)?;
            if delete_source {
                let uid = message.uid();
                let deleted = [Flag::Deleted];
                group.source.with_selection(|sel| {
                    sel.uid_store(&SequenceSet::from_uids(&[uid]), StoreOp::Add, &deleted)
                })?;
                message.apply_store(StoreOp::Add, &deleted);
            }
            Ok(())
        };
        step().map_err(|e| progress.fail(e))?;
        progress.completed += 1;
        report.applied += 1;
    }
    Ok(())
}

/// Selection failures surface as batch errors too
fn wrap(error: anyhow::Error, progress: &Progress) -> anyhow::Error {
    if error.downcast_ref::<BatchError>().is_some() {
        error
    } else {
        progress.fail(error)
    }
}
