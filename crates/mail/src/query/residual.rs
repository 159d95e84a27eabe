//! Client-side predicates the server cannot evaluate exactly

use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;

use super::compiler::Operator;
use crate::models::Flag;

/// A filter condition re-checked against fetched data
#[derive(Debug, Clone)]
pub enum Residual {
    /// Regex over a header value
    HeaderMatch { field: String, pattern: Regex },
    /// Ordinal comparison of a header value (`<`, `>`, `<=`, `>=`)
    HeaderCompare {
        field: String,
        operator: Operator,
        value: String,
    },
    /// Regex over the body text
    BodyMatch { pattern: Regex },
    /// Flag presence (`present`) or absence
    Flag { flag: Flag, present: bool },
}

/// The fetched data a residual is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct MessageView<'a> {
    /// Header values keyed by lowercased field name
    pub headers: &'a HashMap<String, String>,
    pub text: Option<&'a str>,
    pub flags: &'a [Flag],
}

impl Residual {
    /// Lowercased header field this residual reads, if any
    pub fn header_field(&self) -> Option<&str> {
        match self {
            Residual::HeaderMatch { field, .. } | Residual::HeaderCompare { field, .. } => {
                Some(field)
            }
            _ => None,
        }
    }

    pub fn needs_text(&self) -> bool {
        matches!(self, Residual::BodyMatch { .. })
    }

    pub fn matches(&self, view: &MessageView<'_>) -> bool {
        match self {
            Residual::HeaderMatch { field, pattern } => view
                .headers
                .get(field)
                .is_some_and(|value| pattern.is_match(value)),
            Residual::HeaderCompare {
                field,
                operator,
                value,
            } => view.headers.get(field).is_some_and(|actual| {
                let ordering = actual.as_str().cmp(value.as_str());
                match operator {
                    Operator::Lt => ordering == Ordering::Less,
                    Operator::Gt => ordering == Ordering::Greater,
                    Operator::Le => ordering != Ordering::Greater,
                    Operator::Ge => ordering != Ordering::Less,
                    _ => false,
                }
            }),
            Residual::BodyMatch { pattern } => view.text.is_some_and(|text| pattern.is_match(text)),
            Residual::Flag { flag, present } => view.flags.contains(flag) == *present,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("subject".to_string(), "Invoice 2024-117".to_string());
        headers.insert("x-priority".to_string(), "3".to_string());
        headers
    }

    #[test]
    fn test_header_match() {
        let headers = headers();
        let view = MessageView {
            headers: &headers,
            text: None,
            flags: &[],
        };

        let residual = Residual::HeaderMatch {
            field: "subject".into(),
            pattern: Regex::new(r"Invoice \d{4}-\d+").unwrap(),
        };
        assert!(residual.matches(&view));

        let residual = Residual::HeaderMatch {
            field: "from".into(),
            pattern: Regex::new("x").unwrap(),
        };
        assert!(!residual.matches(&view));
    }

    #[test]
    fn test_header_compare() {
        let headers = headers();
        let view = MessageView {
            headers: &headers,
            text: None,
            flags: &[],
        };

        let compare = |operator, value: &str| Residual::HeaderCompare {
            field: "x-priority".into(),
            operator,
            value: value.into(),
        };
        assert!(compare(Operator::Lt, "5").matches(&view));
        assert!(compare(Operator::Ge, "3").matches(&view));
        assert!(!compare(Operator::Gt, "3").matches(&view));
    }

    #[test]
    fn test_body_and_flags() {
        let headers = HashMap::new();
        let flags = [Flag::Seen];
        let view = MessageView {
            headers: &headers,
            text: Some("please find attached"),
            flags: &flags,
        };

        let body = Residual::BodyMatch {
            pattern: Regex::new("attach(ed|ment)").unwrap(),
        };
        assert!(body.matches(&view));

        assert!(Residual::Flag { flag: Flag::Seen, present: true }.matches(&view));
        assert!(!Residual::Flag { flag: Flag::Flagged, present: true }.matches(&view));
        assert!(Residual::Flag { flag: Flag::Flagged, present: false }.matches(&view));
    }
}
