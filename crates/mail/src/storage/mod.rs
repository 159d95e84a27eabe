//! Client-side storage of resolved message handles
//!
//! Nothing here is persisted; the cache is a view over remote state and is
//! only as fresh as its last explicit refresh.

mod cache;

pub use cache::MessageCache;
