//! Search-criteria evaluation for the in-memory transport
//!
//! Criteria arrive as the flat token list a client would send. They are
//! parsed once into a small tree and then evaluated against each message.

use anyhow::{Result, anyhow, bail};
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::models::Flag;

/// The view of one message that search keys are evaluated against
pub(super) struct Candidate<'a> {
    pub seq: u32,
    pub exists: u32,
    pub flags: &'a [Flag],
    pub internal_date: NaiveDate,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Key {
    All,
    Sequence(Vec<(u32, u32)>),
    Not(Box<Key>),
    Or(Box<Key>, Box<Key>),
    And(Vec<Key>),
    Header(String, String),
    Body(String),
    Text(String),
    Before(NaiveDate),
    Since(NaiveDate),
    On(NaiveDate),
    Flag(Flag, bool),
    New,
    Old,
}

/// Parse a complete criteria list into one conjunctive key
pub(super) fn parse(tokens: &[String], exists: u32) -> Result<Key> {
    let mut pos = 0;
    let mut keys = Vec::new();
    while pos < tokens.len() {
        keys.push(parse_key(tokens, &mut pos, exists)?);
    }
    Ok(match keys.len() {
        0 => Key::All,
        1 => keys.remove(0),
        _ => Key::And(keys),
    })
}

fn next<'a>(tokens: &'a [String], pos: &mut usize) -> Result<&'a str> {
    let token = tokens
        .get(*pos)
        .ok_or_else(|| anyhow!("Unexpected end of search criteria"))?;
    *pos += 1;
    Ok(token.as_str())
}

fn parse_date(token: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(token, "%d-%b-%Y")
        .map_err(|e| anyhow!("Bad search date {:?}: {}", token, e))
}

fn parse_key(tokens: &[String], pos: &mut usize, exists: u32) -> Result<Key> {
    let token = next(tokens, pos)?;

    if token.starts_with(|c: char| c.is_ascii_digit() || c == '*') {
        return parse_sequence(token, exists).map(Key::Sequence);
    }

    let key = match token.to_ascii_uppercase().as_str() {
        "ALL" => Key::All,
        "NOT" => Key::Not(Box::new(parse_key(tokens, pos, exists)?)),
        "OR" => {
            let left = parse_key(tokens, pos, exists)?;
            let right = parse_key(tokens, pos, exists)?;
            Key::Or(Box::new(left), Box::new(right))
        }
        "SUBJECT" | "FROM" | "TO" | "CC" | "BCC" => {
            let field = token.to_ascii_lowercase();
            Key::Header(field, next(tokens, pos)?.to_string())
        }
        "HEADER" => {
            let field = next(tokens, pos)?.to_ascii_lowercase();
            Key::Header(field, next(tokens, pos)?.to_string())
        }
        "BODY" => Key::Body(next(tokens, pos)?.to_string()),
        "TEXT" => Key::Text(next(tokens, pos)?.to_string()),
        "BEFORE" => Key::Before(parse_date(next(tokens, pos)?)?),
        "SINCE" => Key::Since(parse_date(next(tokens, pos)?)?),
        "ON" => Key::On(parse_date(next(tokens, pos)?)?),
        "NEW" => Key::New,
        "OLD" => Key::Old,
        "SEEN" => Key::Flag(Flag::Seen, true),
        "UNSEEN" => Key::Flag(Flag::Seen, false),
        "DELETED" => Key::Flag(Flag::Deleted, true),
        "UNDELETED" => Key::Flag(Flag::Deleted, false),
        "FLAGGED" => Key::Flag(Flag::Flagged, true),
        "UNFLAGGED" => Key::Flag(Flag::Flagged, false),
        "ANSWERED" => Key::Flag(Flag::Answered, true),
        "UNANSWERED" => Key::Flag(Flag::Answered, false),
        "RECENT" => Key::Flag(Flag::Recent, true),
        "KEYWORD" => Key::Flag(Flag::parse(next(tokens, pos)?), true),
        "UNKEYWORD" => Key::Flag(Flag::parse(next(tokens, pos)?), false),
        other => bail!("Unsupported search key {}", other),
    };
    Ok(key)
}

fn parse_sequence(token: &str, exists: u32) -> Result<Vec<(u32, u32)>> {
    let number = |s: &str| -> Result<u32> {
        if s == "*" {
            Ok(exists)
        } else {
            s.parse::<u32>()
                .map_err(|_| anyhow!("Bad sequence number {:?}", s))
        }
    };

    token
        .split(',')
        .map(|part| match part.split_once(':') {
            Some((a, b)) => {
                let (a, b) = (number(a)?, number(b)?);
                Ok((a.min(b), a.max(b)))
            }
            None => {
                let n = number(part)?;
                Ok((n, n))
            }
        })
        .collect()
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl Key {
    pub(super) fn matches(&self, c: &Candidate<'_>) -> bool {
        match self {
            Key::All => true,
            Key::Sequence(ranges) => ranges
                .iter()
                .any(|&(start, end)| start <= c.seq && c.seq <= end.min(c.exists)),
            Key::Not(inner) => !inner.matches(c),
            Key::Or(left, right) => left.matches(c) || right.matches(c),
            Key::And(keys) => keys.iter().all(|k| k.matches(c)),
            Key::Header(field, needle) => c
                .headers
                .get(field)
                .is_some_and(|value| contains_ci(value, needle)),
            Key::Body(needle) => contains_ci(&c.body, needle),
            Key::Text(needle) => {
                contains_ci(&c.body, needle)
                    || c.headers.values().any(|v| contains_ci(v, needle))
            }
            Key::Before(date) => c.internal_date < *date,
            Key::Since(date) => c.internal_date >= *date,
            Key::On(date) => c.internal_date == *date,
            Key::Flag(flag, wanted) => c.flags.contains(flag) == *wanted,
            Key::New => c.flags.contains(&Flag::Recent) && !c.flags.contains(&Flag::Seen),
            Key::Old => !c.flags.contains(&Flag::Recent),
        }
    }
}
