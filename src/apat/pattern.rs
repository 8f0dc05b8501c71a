use memchr::memmem;

use std::fmt;

use crate::apat::*;
use crate::errors::PatternError;
use crate::iupac;

/// A compiled approximate pattern.
///
/// Immutable after compilation and freely shared between workers; all search
/// state lives in the [`IndexedSequence`].
#[derive(Debug, Clone)]
pub struct ApatPattern {
    text: String,
    masks: Vec<u8>,
    // bit i of table[m] is set when pattern position i accepts target mask m
    table: [u64; 16],
    max_errors: usize,
    allows_indels: bool,
    literal: Option<Vec<u8>>,
}

impl ApatPattern {
    pub fn compile(
        pattern: &str,
        max_errors: usize,
        allows_indels: bool,
    ) -> std::result::Result<Self, PatternError> {
        let masks = parse_masks(pattern)?;

        if masks.len() > MAX_PAT_LEN {
            return Err(PatternError::TooLong {
                len: masks.len(),
                max: MAX_PAT_LEN,
            });
        }

        if max_errors >= masks.len() {
            return Err(PatternError::TooManyErrors {
                errors: max_errors,
                len: masks.len(),
            });
        }

        Ok(Self::from_masks(masks, max_errors, allows_indels))
    }

    fn from_masks(masks: Vec<u8>, max_errors: usize, allows_indels: bool) -> Self {
        let mut table = [0u64; 16];
        for (t, row) in table.iter_mut().enumerate() {
            for (i, &m) in masks.iter().enumerate() {
                if m & t as u8 != 0 {
                    *row |= 1 << i;
                }
            }
        }

        let text: String = masks.iter().map(|&m| iupac::code(m) as char).collect();
        let literal = (max_errors == 0
            && !allows_indels
            && masks.iter().all(|m| m.count_ones() == 1))
        .then(|| text.as_bytes().to_vec());

        Self {
            text,
            masks,
            table,
            max_errors,
            allows_indels,
            literal,
        }
    }

    /// Pattern matching the reverse complement of what `self` matches.
    pub fn reverse_complement(&self) -> Self {
        let masks = self
            .masks
            .iter()
            .rev()
            .map(|&m| iupac::complement_mask(m))
            .collect();
        Self::from_masks(masks, self.max_errors, self.allows_indels)
    }

    /// Canonical lowercase IUPAC form, one code per position.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn max_errors(&self) -> usize {
        self.max_errors
    }

    pub fn allows_indels(&self) -> bool {
        self.allows_indels
    }

    pub(crate) fn masks(&self) -> &[u8] {
        &self.masks
    }

    pub(crate) fn accept(&self, target_mask: u8) -> u64 {
        self.table[(target_mask & iupac::ANY) as usize]
    }

    /// All occurrences starting inside `[begin, begin + length)` and ending
    /// inside it, sorted by start.
    ///
    /// The returned slice borrows the sequence's hit buffer and is invalidated
    /// by the next search on the same sequence.
    pub fn find_all<'s>(
        &self,
        seq: &'s mut IndexedSequence,
        begin: usize,
        length: usize,
    ) -> &'s [ApatMatch] {
        seq.hits.clear();
        let (start, end) = seq.window(begin, length);

        if end - start >= self.len() {
            match &self.literal {
                Some(lit) if !seq.ambiguous => self.find_exact(seq, lit, start, end),
                _ if self.allows_indels => self.search_indels(seq, start, end),
                _ => self.search_substitutions(seq, start, end),
            }
        }

        &seq.hits
    }

    /// Occurrence with the fewest errors, leftmost on ties.
    pub fn best_match(
        &self,
        seq: &mut IndexedSequence,
        begin: usize,
        length: usize,
    ) -> Option<ApatMatch> {
        self.find_all(seq, begin, length)
            .iter()
            .min_by_key(|m| (m.errors, m.start))
            .copied()
    }

    pub fn is_matching(&self, seq: &mut IndexedSequence, begin: usize, length: usize) -> bool {
        !self.find_all(seq, begin, length).is_empty()
    }

    fn find_exact(&self, seq: &mut IndexedSequence, lit: &[u8], start: usize, end: usize) {
        let m = lit.len();
        let hits = memmem::find_iter(&seq.bases[start..end], lit)
            .map(|p| start + p)
            .filter(|&s| !seq.circular || s < seq.seq_len)
            .map(|s| ApatMatch {
                start: s,
                end: s + m,
                errors: 0,
            })
            .collect::<Vec<_>>();
        seq.hits = hits;
    }
}

impl fmt::Display for ApatPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)?;
        if self.max_errors > 0 {
            write!(f, "(errors={}", self.max_errors)?;
            if self.allows_indels {
                write!(f, ",indels")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

fn parse_masks(pattern: &str) -> std::result::Result<Vec<u8>, PatternError> {
    let bytes = pattern.as_bytes();
    let mut masks = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c == b'[' {
            let close = bytes[i + 1..]
                .iter()
                .position(|&b| b == b']')
                .ok_or(PatternError::UnclosedBracket)?;
            let class = &bytes[i + 1..i + 1 + close];

            if class.is_empty() {
                return Err(PatternError::EmptyBracket);
            }

            let mut m = 0;
            for (j, &b) in class.iter().enumerate() {
                let bm = iupac::mask(b);
                if bm == 0 {
                    return Err(PatternError::InvalidChar {
                        c: b as char,
                        pos: i + 1 + j,
                    });
                }
                m |= bm;
            }

            masks.push(m);
            i += close + 2;
        } else {
            let m = iupac::mask(c);
            if m == 0 {
                return Err(PatternError::InvalidChar {
                    c: pattern[i..].chars().next().unwrap_or('?'),
                    pos: i,
                });
            }
            masks.push(m);
            i += 1;
        }
    }

    if masks.is_empty() {
        return Err(PatternError::Empty);
    }

    Ok(masks)
}
