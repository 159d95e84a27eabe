//! Value types shared by the transport and the object model

mod flag;
pub mod headers;
mod sequence;

pub use flag::Flag;
pub use sequence::{SequenceSet, Uid};
