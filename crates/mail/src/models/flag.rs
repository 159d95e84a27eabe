//! Message flags (system flags and keywords)

use serde::{Deserialize, Serialize};
use std::fmt;

/// A flag attached to a message on the server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Recent,
    /// Any non-system keyword (e.g. `$Junk`, `NonJunk`)
    Keyword(String),
}

impl Flag {
    /// Parse a flag from its wire form (`\Seen`) or a bare name (`seen`).
    ///
    /// System flag names are matched case-insensitively; anything else is a
    /// keyword and keeps its original spelling.
    pub fn parse(s: &str) -> Self {
        let name = s.trim();
        let bare = name.strip_prefix('\\').unwrap_or(name);
        match bare.to_ascii_lowercase().as_str() {
            "seen" => Flag::Seen,
            "answered" => Flag::Answered,
            "flagged" => Flag::Flagged,
            "deleted" => Flag::Deleted,
            "draft" => Flag::Draft,
            "recent" => Flag::Recent,
            _ => Flag::Keyword(bare.to_string()),
        }
    }

    /// Whether this is one of the RFC 3501 system flags
    pub fn is_system(&self) -> bool {
        !matches!(self, Flag::Keyword(_))
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::Seen => f.write_str("\\Seen"),
            Flag::Answered => f.write_str("\\Answered"),
            Flag::Flagged => f.write_str("\\Flagged"),
            Flag::Deleted => f.write_str("\\Deleted"),
            Flag::Draft => f.write_str("\\Draft"),
            Flag::Recent => f.write_str("\\Recent"),
            Flag::Keyword(k) => f.write_str(k),
        }
    }
}

impl From<&str> for Flag {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_system_flags() {
        assert_eq!(Flag::parse("\\Seen"), Flag::Seen);
        assert_eq!(Flag::parse("deleted"), Flag::Deleted);
        assert_eq!(Flag::parse("\\RECENT"), Flag::Recent);
    }

    #[test]
    fn test_parse_keyword_keeps_case() {
        assert_eq!(Flag::parse("$Junk"), Flag::Keyword("$Junk".to_string()));
        assert!(!Flag::parse("$Junk").is_system());
    }

    #[test]
    fn test_display_wire_form() {
        assert_eq!(Flag::Deleted.to_string(), "\\Deleted");
        assert_eq!(Flag::Keyword("NonJunk".into()).to_string(), "NonJunk");
    }
}
