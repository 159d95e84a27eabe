//! Message identifiers and sequence sets

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned unique identifier for a message, stable across selections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub u32);

impl Uid {
    pub fn new(uid: u32) -> Self {
        Self(uid)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Uid {
    fn from(n: u32) -> Self {
        Self(n)
    }
}

/// A set of message numbers (sequence numbers or UIDs) as sent on the wire
///
/// Stored as sorted, non-overlapping inclusive ranges and rendered in the
/// compressed `1:3,5,9:12` form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceSet {
    ranges: Vec<(u32, u32)>,
}

impl SequenceSet {
    /// An inclusive range `start:end`. Empty if `start > end`.
    pub fn range(start: u32, end: u32) -> Self {
        if start > end || start == 0 {
            return Self::default();
        }
        Self {
            ranges: vec![(start, end)],
        }
    }

    /// Build a set from arbitrary ids; duplicates are dropped and adjacent
    /// ids are merged into ranges.
    pub fn from_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let mut sorted: Vec<u32> = ids.into_iter().filter(|&n| n > 0).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for n in sorted {
            match ranges.last_mut() {
                Some((_, end)) if end.checked_add(1) == Some(n) => *end = n,
                _ => ranges.push((n, n)),
            }
        }
        Self { ranges }
    }

    pub fn from_uids(uids: &[Uid]) -> Self {
        Self::from_ids(uids.iter().map(|u| u.0))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of ids in the set
    pub fn len(&self) -> usize {
        self.ranges
            .iter()
            .map(|(start, end)| (end - start) as usize + 1)
            .sum()
    }

    pub fn contains(&self, n: u32) -> bool {
        self.ranges.iter().any(|&(start, end)| start <= n && n <= end)
    }

    /// Iterate over every id in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ranges.iter().flat_map(|&(start, end)| start..=end)
    }

    /// Split into consecutive sets of at most `size` ids each
    pub fn slices(&self, size: usize) -> Vec<SequenceSet> {
        let size = size.max(1);
        let ids: Vec<u32> = self.iter().collect();
        ids.chunks(size)
            .map(|chunk| Self::from_ids(chunk.iter().copied()))
            .collect()
    }
}

impl fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &(start, end)) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}:{}", start, end)?;
            }
        }
        Ok(())
    }
}
