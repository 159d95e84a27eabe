//! Declarative message filters
//!
//! A filter maps dotted selector keys to comparison values:
//! - `headers.<field>.<op>` - header comparison (`headers.date.<` etc.)
//! - `body.<op>` - body text comparison
//! - `flag.<name>.<op>` - flag presence
//! - `new` - only new (recent, unseen) messages; falsy value inverts
//! - `count`, `offset` - result window
//!
//! Operators are `=`, `<>`, `<`, `>`, `<=`, `>=` and `~` (regex).

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;

/// Value side of a filter entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterValue {
    Text(String),
    Date(NaiveDate),
    Bool(bool),
    Number(u32),
}

impl FilterValue {
    /// Text form used for header and body comparisons
    pub fn as_text(&self) -> String {
        self.to_string()
    }

    /// Calendar date, accepting `YYYY/MM/DD`, `YYYY-MM-DD` or `DD-Mon-YYYY` text
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FilterValue::Date(date) => Some(*date),
            FilterValue::Text(text) => parse_date(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<u32> {
        match self {
            FilterValue::Number(n) => Some(*n),
            FilterValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Truthiness for boolean-valued keys (`new`, `flag.*`)
    pub fn is_truthy(&self) -> bool {
        match self {
            FilterValue::Bool(b) => *b,
            FilterValue::Number(n) => *n != 0,
            FilterValue::Date(_) => true,
            FilterValue::Text(text) => !matches!(
                text.trim().to_ascii_lowercase().as_str(),
                "" | "0" | "false" | "no" | "off"
            ),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Text(text) => f.write_str(text),
            FilterValue::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            FilterValue::Bool(b) => write!(f, "{}", b),
            FilterValue::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Text(s)
    }
}

impl From<NaiveDate> for FilterValue {
    fn from(date: NaiveDate) -> Self {
        FilterValue::Date(date)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        FilterValue::Bool(b)
    }
}

impl From<u32> for FilterValue {
    fn from(n: u32) -> Self {
        FilterValue::Number(n)
    }
}

/// A filter map, ordered by key
///
/// Equality and hashing go through the ordered entries, so two filters built
/// in different insertion orders are the same cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Filter {
    entries: BTreeMap<String, FilterValue>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FilterValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K, V> FromIterator<(K, V)> for Filter
where
    K: Into<String>,
    V: Into<FilterValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filter = Filter::new();
        for (k, v) in iter {
            filter.insert(k, v);
        }
        filter
    }
}

fn parse_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();

    // Try YYYY/MM/DD format
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y/%m/%d") {
        return Some(date);
    }

    // Try YYYY-MM-DD format
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(date);
    }

    NaiveDate::parse_from_str(input, "%d-%b-%Y").ok()
}
