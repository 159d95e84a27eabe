//! Bulk actions over resolved messages
//!
//! Mutations go straight to the server; nothing here touches the result
//! caches, so callers refresh to observe the new state.

mod batch;

pub(crate) use batch::execute;
pub use batch::{Action, Batch, BatchError, BatchReport, Selector};
