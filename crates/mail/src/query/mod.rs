//! Message filters and their compilation into server searches

mod compiler;
mod filter;
mod literals;
mod residual;

pub use compiler::{
    CompiledQuery, FilterParseError, INLINE_HEADERS, Operator, Window, compile,
};
pub use filter::{Filter, FilterValue};
pub use literals::required_literals;
pub use residual::{MessageView, Residual};
