//! Required-literal extraction from regular expressions
//!
//! Server-side search only understands substring containment, so a regex
//! filter is approximated by the literal runs that every match of the
//! pattern must contain. The approximation may over-select; the regex itself
//! is always re-checked client-side.
//!
//! The pattern is parsed with `regex-syntax`, the same parser the `regex`
//! crate uses, so escapes, flags and classes are read exactly as the matcher
//! reads them. Anything that makes a run uncertain ends it: optional or
//! open-ended repetition, classes (including case-insensitive letters),
//! look-around assertions, alternation.

use regex_syntax::Parser;
use regex_syntax::hir::{Hir, HirKind};

/// Exact repetitions longer than this are not unrolled into a run
const MAX_UNROLL: u32 = 16;

/// Literal substrings every match of `pattern` must contain
///
/// An unparseable pattern yields no literals.
pub fn required_literals(pattern: &str) -> Vec<String> {
    let Ok(hir) = Parser::new().parse(pattern) else {
        return Vec::new();
    };

    let mut collector = Collector::default();
    collector.visit(&hir);
    collector.flush();
    collector.literals
}

#[derive(Default)]
struct Collector {
    /// Bytes known to appear contiguously in every match
    run: Vec<u8>,
    literals: Vec<String>,
}

impl Collector {
    fn flush(&mut self) {
        let run = std::mem::take(&mut self.run);
        // Byte-mode literals that are not valid UTF-8 cannot be searched for
        if let Ok(text) = String::from_utf8(run)
            && !text.trim().is_empty()
            && !self.literals.contains(&text)
        {
            self.literals.push(text);
        }
    }

    fn visit(&mut self, hir: &Hir) {
        match hir.kind() {
            HirKind::Empty => {}
            HirKind::Literal(literal) => self.run.extend_from_slice(&literal.0),
            HirKind::Capture(capture) => self.visit(&capture.sub),
            HirKind::Concat(parts) => {
                for part in parts {
                    self.visit(part);
                }
            }
            HirKind::Repetition(rep) if rep.max == Some(rep.min) && rep.min <= MAX_UNROLL => {
                for _ in 0..rep.min {
                    self.visit(&rep.sub);
                }
            }
            HirKind::Repetition(rep) if rep.min >= 1 => {
                // The first copy directly follows what came before
                self.visit(&rep.sub);
                self.flush();
            }
            HirKind::Repetition(_) | HirKind::Class(_) | HirKind::Look(_) | HirKind::Alternation(_) => {
                self.flush()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_plain_literal() {
        assert_eq!(required_literals("invoice"), vec!["invoice"]);
    }

    #[test]
    fn test_runs_split_on_uncertainty() {
        assert_eq!(required_literals(r"order #\d+ shipped"), vec!["order #", " shipped"]);
        assert_eq!(required_literals("^Re: .*weekly"), vec!["Re: ", "weekly"]);
        assert_eq!(required_literals("colou?r"), vec!["colo", "r"]);
    }

    #[test]
    fn test_repetition() {
        assert_eq!(required_literals("go+gle"), vec!["go", "gle"]);
        assert_eq!(required_literals("ab{0,3}c"), vec!["a", "c"]);
        assert_eq!(required_literals("ab{2}c"), vec!["abbc"]);
    }

    #[test]
    fn test_groups() {
        assert_eq!(required_literals("(urgent)? report"), vec![" report"]);
        assert_eq!(required_literals("(a|b)report"), vec!["report"]);
        assert_eq!(required_literals("(?P<kind>urgent) report"), vec!["urgent report"]);
    }

    #[test]
    fn test_flags() {
        // Case-insensitive letters become classes
        assert!(required_literals("(?i)invoice").is_empty());
        assert_eq!(required_literals("(?i)invoice 2024"), vec![" 2024"]);
        assert_eq!(required_literals("(?x) inv oice # comment"), vec!["invoice"]);
    }

    #[test]
    fn test_no_literals() {
        assert!(required_literals("invoice|receipt").is_empty());
        assert!(required_literals(r"[a-z]+\d*").is_empty());
        assert!(required_literals("(unclosed").is_empty());
    }

    #[test]
    fn test_escapes() {
        assert_eq!(required_literals(r"\[rust-users\]"), vec!["[rust-users]"]);
        assert_eq!(required_literals(r"v1\.2"), vec!["v1.2"]);
        assert_eq!(required_literals(r"\x41bc"), vec!["Abc"]);
        assert_eq!(required_literals(r"\x{41}bc"), vec!["Abc"]);
        assert_eq!(required_literals(r"\u0041bc"), vec!["Abc"]);
        assert_eq!(required_literals(r"\U00000041bc"), vec!["Abc"]);
        assert_eq!(required_literals(r"\pLnvoice"), vec!["nvoice"]);
        assert_eq!(required_literals(r"\p{Greek}+ letters"), vec![" letters"]);
    }

    #[test]
    fn test_literals_are_contained_in_every_match() {
        let cases = [
            (r"\x41bc", "Abc"),
            (r"Ab\U00000063", "xAbcx"),
            (r"^\[rust-users\] .*digest", "[rust-users] Weekly digest"),
            (r"order #\d+ shipped", "your order #1234 shipped today"),
            (r"(?i)INVOICE \d{4}", "invoice 2024"),
            (r"(?i:re): (fwd: )?hello", "RE: hello"),
            (r"(?x) hello \s+ world", "hello \t world"),
            (r"\p{Lu}\p{Ll}+ café", "Zoë café"),
            (r"colou?r", "color"),
            (r"ab{2,}c", "abbbbc"),
            (r"(ab)+c", "ababc"),
            (r"(?s)start.end", "start\nend"),
            (r"\bword\b", "a word here"),
            (r"x{3}", "xxx"),
            (r"(?:foo|bar)baz", "barbaz"),
            (r"naïve\.", "so naïve."),
            (r"\t\n", "a\t\nb"),
        ];

        for (pattern, text) in cases {
            let regex = Regex::new(pattern).unwrap();
            assert!(regex.is_match(text), "{} should match {:?}", pattern, text);

            let literals = required_literals(pattern);
            for literal in &literals {
                assert!(
                    text.contains(literal.as_str()),
                    "{:?} from {} is not in {:?}",
                    literal,
                    pattern,
                    text
                );
            }
        }
    }
}
