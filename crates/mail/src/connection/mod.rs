//! Connection sharing and selection discipline

mod guard;

pub use guard::{ConnectionGuard, Msn, Selection};
