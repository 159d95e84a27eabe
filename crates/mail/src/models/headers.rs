//! RFC 5322 header block parsing

use log::warn;
use mailparse::{MailHeader, parse_headers};
use std::collections::HashMap;

fn parsed(raw: &[u8]) -> Vec<MailHeader<'_>> {
    match parse_headers(raw) {
        Ok((headers, _)) => headers,
        Err(e) => {
            warn!("Unparseable header block: {}", e);
            Vec::new()
        }
    }
}

/// Parse a raw header block into a map keyed by lowercased field name.
///
/// Values are unfolded and RFC 2047 encoded words are decoded. When a field
/// repeats, the first occurrence wins. Parsing stops at the first empty line,
/// so a full message can be passed as well.
pub fn parse_header_block(raw: &[u8]) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::new();
    for header in parsed(raw) {
        headers
            .entry(header.get_key().to_ascii_lowercase())
            .or_insert_with(|| header.get_value().trim().to_string());
    }
    headers
}

/// The raw lines of the named fields, in message order, as a
/// `HEADER.FIELDS` reply carries them (terminated by an empty line)
pub fn select_header_fields(raw: &[u8], names: &[String]) -> Vec<u8> {
    let mut block = Vec::new();
    for header in parsed(raw) {
        let key = header.get_key();
        if names.iter().any(|n| n.eq_ignore_ascii_case(&key)) {
            block.extend_from_slice(key.as_bytes());
            block.extend_from_slice(b": ");
            block.extend_from_slice(header.get_value_raw());
            block.extend_from_slice(b"\r\n");
        }
    }
    block.extend_from_slice(b"\r\n");
    block
}

/// Split a raw RFC 822 message into header block and body
pub fn split_message(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(raw, b"\r\n\r\n") {
        return (&raw[..pos + 2], &raw[pos + 4..]);
    }
    if let Some(pos) = find(raw, b"\n\n") {
        return (&raw[..pos + 1], &raw[pos + 2..]);
    }
    (raw, &[])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
