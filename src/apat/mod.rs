//! Approximate nucleotide pattern matching.
//!
//! A pattern is compiled once ([`ApatPattern::compile`]) and searched against an
//! [`IndexedSequence`], a reusable per-worker buffer holding the encoded target
//! sequence and the search scratch space.
//!
//! Patterns are IUPAC strings (`ACGTRYN...`) with optional bracket classes
//! (`[AG]`), at most [`MAX_PAT_LEN`] positions long. A pattern base matches a
//! target base when their IUPAC sets intersect.
//!
//! Without indels, an occurrence is a window of exactly the pattern length
//! with at most `max_errors` mismatches. With indels, an occurrence is an
//! alignment with at most `max_errors` edits (Levenshtein distance) that is the
//! best one from its start and the best one to its end, ties broken toward the
//! longest span. Both rules give the same hits, mirrored, when the reverse
//! complement of a pattern is searched on the reverse complement of a target.

mod pattern;
pub use pattern::*;

mod sequence;
pub use sequence::*;

mod search;

/// Longest supported pattern, in positions.
pub const MAX_PAT_LEN: usize = 64;

/// One occurrence of a pattern: `[start, end)` in the target and the number
/// of edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApatMatch {
    pub start: usize,
    pub end: usize,
    pub errors: usize,
}

impl ApatMatch {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn overlaps(&self, other: &ApatMatch) -> bool {
        self.start < other.end && other.start < self.end
    }
}
