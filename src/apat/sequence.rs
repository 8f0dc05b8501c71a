use crate::apat::*;
use crate::iupac;
use crate::record::BioRecord;

/// Target sequence prepared for pattern search.
///
/// Each worker owns one and re-attaches it to every record it processes, so
/// the base buffer, the automaton state and the hit buffer are allocated once.
#[derive(Debug, Default)]
pub struct IndexedSequence {
    pub(crate) bases: Vec<u8>,
    pub(crate) masks: Vec<u8>,
    pub(crate) seq_len: usize,
    pub(crate) circular: bool,
    pub(crate) ambiguous: bool,
    // scratch
    pub(crate) states: Vec<u64>,
    pub(crate) ends: Vec<usize>,
    pub(crate) starts: Vec<usize>,
    pub(crate) row_prev: Vec<u32>,
    pub(crate) row_curr: Vec<u32>,
    pub(crate) end_best: Vec<(usize, usize)>,
    pub(crate) hits: Vec<ApatMatch>,
}

impl IndexedSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, record: &BioRecord) {
        self.attach_bytes(record.sequence(), false);
    }

    pub fn attach_circular(&mut self, record: &BioRecord) {
        self.attach_bytes(record.sequence(), true);
    }

    /// Load a sequence. A circular sequence gets its first `MAX_PAT_LEN` bases
    /// appended so that occurrences can span the origin.
    pub fn attach_bytes(&mut self, seq: &[u8], circular: bool) {
        self.bases.clear();
        self.masks.clear();
        self.hits.clear();

        self.bases.extend(seq.iter().map(|b| b.to_ascii_lowercase()));
        if circular {
            let ext = seq.len().min(MAX_PAT_LEN);
            self.bases.extend_from_within(..ext);
        }

        self.masks.extend(self.bases.iter().map(|&b| iupac::mask(b)));
        self.ambiguous = self
            .bases
            .iter()
            .any(|b| !matches!(b, b'a' | b'c' | b'g' | b't'));
        self.seq_len = seq.len();
        self.circular = circular;
    }

    /// Length of the attached sequence, without the circular extension.
    pub fn len(&self) -> usize {
        self.seq_len
    }

    pub fn is_empty(&self) -> bool {
        self.seq_len == 0
    }

    pub fn is_circular(&self) -> bool {
        self.circular
    }

    /// Lowercase bases of the attached sequence, without the circular extension.
    pub fn bases(&self) -> &[u8] {
        &self.bases[..self.seq_len]
    }

    /// Searchable `[start, end)` for a `begin`/`length` request.
    pub(crate) fn window(&self, begin: usize, length: usize) -> (usize, usize) {
        let total = self.bases.len();
        let start = begin.min(total);
        let end = begin.saturating_add(length).min(total);
        (start, end)
    }

    /// Whether a match starting at `start` should be reported.
    pub(crate) fn valid_start(&self, start: usize) -> bool {
        !self.circular || start < self.seq_len
    }
}
