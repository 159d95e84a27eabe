//! Filter compilation
//!
//! Translates a [`Filter`] into search tokens the server evaluates plus
//! residual predicates checked locally after fetching. Compilation never
//! touches the transport.

use chrono::NaiveDate;
use regex::Regex;
use std::fmt;

use super::filter::{Filter, FilterValue};
use super::literals::required_literals;
use super::residual::{MessageView, Residual};
use crate::models::Flag;

pub const COUNT_KEY: &str = "count";
pub const OFFSET_KEY: &str = "offset";
pub const NEW_KEY: &str = "new";

/// Header fields that have their own search key
const SEARCHABLE_HEADERS: [&str; 4] = ["subject", "to", "from", "cc"];

/// Headers always fetched inline with a message
pub const INLINE_HEADERS: [&str; 3] = ["subject", "to", "from"];

/// A filter key that cannot be compiled
#[derive(Debug, thiserror::Error)]
pub enum FilterParseError {
    #[error("operator {operator:?} is not defined for selector {selector:?}")]
    UnknownOperator { selector: String, operator: String },

    #[error("unknown selector {selector:?}")]
    UnknownDomain { selector: String },

    #[error("malformed filter key {key:?}, expected <selector>.<operator>")]
    MalformedSelector { key: String },

    #[error("value for {key:?} must be {expected}")]
    InvalidValue { key: String, expected: String },

    #[error("invalid regex for {key:?}")]
    InvalidRegex {
        key: String,
        #[source]
        source: regex::Error,
    },
}

/// Comparison operator of a filter key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Match,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "=" => Operator::Eq,
            "<>" => Operator::Ne,
            "<" => Operator::Lt,
            ">" => Operator::Gt,
            "<=" => Operator::Le,
            ">=" => Operator::Ge,
            "~" => Operator::Match,
            _ => return None,
        })
    }

    fn is_ordinal(self) -> bool {
        matches!(self, Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Match => "~",
        })
    }
}

/// Result window: `offset` is the first ordinal (1-based), `count` the
/// maximum number of ordinals examined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u32,
    pub count: Option<u32>,
}

impl Default for Window {
    fn default() -> Self {
        Self {
            offset: 1,
            count: None,
        }
    }
}

impl Window {
    /// Inclusive ordinal bounds for a mailbox of `exists` messages, or
    /// `None` when the window is empty
    pub fn bounds(&self, exists: u32) -> Option<(u32, u32)> {
        let end = match self.count {
            Some(0) => return None,
            Some(count) => self.offset.saturating_add(count - 1).min(exists),
            None => exists,
        };
        (self.offset <= end).then_some((self.offset, end))
    }
}

/// A compiled filter
#[derive(Debug, Clone, Default)]
pub struct CompiledQuery {
    pub window: Window,
    /// Search tokens, excluding the window range
    pub criteria: Vec<String>,
    pub residual: Vec<Residual>,
}

impl CompiledQuery {
    /// Full SEARCH token list for a mailbox of `exists` messages
    pub fn search_tokens(&self, exists: u32) -> Option<Vec<String>> {
        let (start, end) = self.window.bounds(exists)?;
        let mut tokens = vec![format!("{}:{}", start, end)];
        tokens.extend(self.criteria.iter().cloned());
        Some(tokens)
    }

    /// Whether the search step can be skipped in favour of a range fetch
    pub fn needs_search(&self) -> bool {
        !self.criteria.is_empty()
    }

    /// Header fields to fetch inline so residuals can be evaluated
    pub fn header_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = INLINE_HEADERS.iter().map(|h| h.to_string()).collect();
        for field in self.residual.iter().filter_map(Residual::header_field) {
            if !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        }
        fields
    }

    pub fn needs_text(&self) -> bool {
        self.residual.iter().any(Residual::needs_text)
    }

    /// Second pass: every residual predicate must hold
    pub fn accepts(&self, view: &MessageView<'_>) -> bool {
        self.residual.iter().all(|r| r.matches(view))
    }
}

fn search_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

fn tokens(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn window_value(key: &str, value: &FilterValue, minimum: u32) -> Result<u32, FilterParseError> {
    value
        .as_number()
        .filter(|&n| n >= minimum)
        .ok_or_else(|| FilterParseError::InvalidValue {
            key: key.to_string(),
            expected: if minimum > 0 {
                "a positive number".to_string()
            } else {
                "a number".to_string()
            },
        })
}

fn regex(key: &str, value: &FilterValue) -> Result<Regex, FilterParseError> {
    Regex::new(&value.as_text()).map_err(|source| FilterParseError::InvalidRegex {
        key: key.to_string(),
        source,
    })
}

/// Compile a filter into search criteria and residual predicates
pub fn compile(filter: &Filter) -> Result<CompiledQuery, FilterParseError> {
    let mut query = CompiledQuery::default();

    if let Some(value) = filter.get(OFFSET_KEY) {
        query.window.offset = window_value(OFFSET_KEY, value, 1)?;
    }
    if let Some(value) = filter.get(COUNT_KEY) {
        query.window.count = Some(window_value(COUNT_KEY, value, 0)?);
    }

    if let Some(value) = filter.get(NEW_KEY) {
        if !value.is_truthy() {
            query.criteria.push("NOT".to_string());
        }
        query.criteria.push("NEW".to_string());
    }

    for (key, value) in filter.iter() {
        if matches!(key, COUNT_KEY | OFFSET_KEY | NEW_KEY) {
            continue;
        }
        compile_entry(key, value, &mut query)?;
    }

    Ok(query)
}

fn compile_entry(
    key: &str,
    value: &FilterValue,
    query: &mut CompiledQuery,
) -> Result<(), FilterParseError> {
    let malformed = || FilterParseError::MalformedSelector {
        key: key.to_string(),
    };

    let (selector, op) = key.rsplit_once('.').ok_or_else(malformed)?;
    if selector.is_empty() {
        return Err(malformed());
    }
    let unknown_operator = || FilterParseError::UnknownOperator {
        selector: selector.to_string(),
        operator: op.to_string(),
    };
    let operator = Operator::parse(op).ok_or_else(unknown_operator)?;

    let (domain, field) = match selector.split_once('.') {
        Some((domain, field)) => (domain, Some(field)),
        None => (selector, None),
    };

    match (domain, field) {
        ("headers", Some("date")) => {
            let date = value
                .as_date()
                .ok_or_else(|| FilterParseError::InvalidValue {
                    key: key.to_string(),
                    expected: "a date".to_string(),
                })?;
            let d = search_date(date);
            let d = d.as_str();
            let emitted = match operator {
                Operator::Lt => tokens(&["BEFORE", d]),
                Operator::Gt => tokens(&["SINCE", d, "NOT", "ON", d]),
                Operator::Ne => tokens(&["NOT", "ON", d]),
                Operator::Le => tokens(&["OR", "BEFORE", d, "ON", d]),
                Operator::Ge => tokens(&["SINCE", d]),
                Operator::Eq => tokens(&["ON", d]),
                Operator::Match => return Err(unknown_operator()),
            };
            query.criteria.extend(emitted);
        }
        ("headers", Some(field)) if !field.is_empty() => {
            let field = field.to_ascii_lowercase();
            // Search key prefix: `SUBJECT` or `HEADER X-Mailer`
            let prefix = if SEARCHABLE_HEADERS.contains(&field.as_str()) {
                vec![field.to_ascii_uppercase()]
            } else {
                vec!["HEADER".to_string(), field.clone()]
            };

            match operator {
                Operator::Eq => {
                    query.criteria.extend(prefix);
                    query.criteria.push(value.as_text());
                }
                Operator::Ne => {
                    query.criteria.push("NOT".to_string());
                    query.criteria.extend(prefix);
                    query.criteria.push(value.as_text());
                }
                Operator::Match => {
                    let pattern = regex(key, value)?;
                    for literal in required_literals(pattern.as_str()) {
                        query.criteria.extend(prefix.iter().cloned());
                        query.criteria.push(literal);
                    }
                    query.residual.push(Residual::HeaderMatch { field, pattern });
                }
                _ if operator.is_ordinal() => {
                    query.residual.push(Residual::HeaderCompare {
                        field,
                        operator,
                        value: value.as_text(),
                    });
                }
                _ => return Err(unknown_operator()),
            }
        }
        ("body", None) => match operator {
            Operator::Eq => query.criteria.extend(["BODY".to_string(), value.as_text()]),
            Operator::Ne => {
                query
                    .criteria
                    .extend(["NOT".to_string(), "BODY".to_string(), value.as_text()]);
            }
            Operator::Match => {
                let pattern = regex(key, value)?;
                for literal in required_literals(pattern.as_str()) {
                    query.criteria.extend(["BODY".to_string(), literal]);
                }
                query.residual.push(Residual::BodyMatch { pattern });
            }
            _ => return Err(unknown_operator()),
        },
        ("flag", Some(name)) if !name.is_empty() => {
            let wanted = value.is_truthy();
            let present = match operator {
                Operator::Eq => wanted,
                Operator::Ne => !wanted,
                _ => return Err(unknown_operator()),
            };
            query.residual.push(Residual::Flag {
                flag: Flag::parse(name),
                present,
            });
        }
        ("headers", _) | ("flag", _) => return Err(malformed()),
        _ => {
            return Err(FilterParseError::UnknownDomain {
                selector: selector.to_string(),
            });
        }
    }

    Ok(())
}
