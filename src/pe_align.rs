//! Paired-end read assembly.
//!
//! The reverse read is reverse complemented and aligned against the forward
//! read with an overlap alignment (free end gaps on both reads). Scores are
//! quality weighted: an identity gains `min(qA, qB)`, a mismatch loses it, and
//! a gap costs `gap_penalty` times a Q40 mismatch.
//!
//! In fast mode the alignment is restricted to a band of diagonals around the
//! shift found by k-mer voting ([`ShiftSearcher`]). Pairs without an
//! acceptable overlap are joined with a run of `.` instead.

use std::fmt;

use crate::errors::*;
use crate::iupac;
use crate::record::BioRecord;
use crate::seed_search::ShiftSearcher;

const Q40: i32 = 40;
const DEFAULT_QUAL: u8 = 40;
const JOIN_LEN: usize = 10;
const NEG: i32 = i32::MIN / 4;

// traceback codes
const START: u8 = 0;
const DIAG: u8 = 1;
const UP: u8 = 2;
const LEFT: u8 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct PeAlignParams {
    /// Gap cost, as a multiple of a Q40 mismatch.
    pub gap_penalty: f64,
    /// Half width of the band of diagonals searched around the seed shift.
    pub delta: usize,
    pub min_overlap: usize,
    /// Minimum fraction of identical columns in the overlap.
    pub min_identity: f64,
    pub with_stats: bool,
    pub fast_mode: bool,
    /// Rank seed shifts by votes per overlapped base instead of raw votes.
    pub fast_relative_score: bool,
}

impl Default for PeAlignParams {
    fn default() -> Self {
        Self {
            gap_penalty: 2.0,
            delta: 5,
            min_overlap: 20,
            min_identity: 0.9,
            with_stats: true,
            fast_mode: true,
            fast_relative_score: false,
        }
    }
}

impl PeAlignParams {
    pub fn validate(&self) -> Result<()> {
        if self.gap_penalty.is_nan() || self.gap_penalty < 0.0 {
            return Err(Error::InvalidParameter {
                parameter: "gap_penalty",
                reason: format!("must be >= 0, got {}", self.gap_penalty),
            });
        }
        if !(0.0..=1.0).contains(&self.min_identity) {
            return Err(Error::InvalidParameter {
                parameter: "min_identity",
                reason: format!("must be within [0, 1], got {}", self.min_identity),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliDir {
    /// The forward read starts first.
    Left,
    /// The reverse read starts first: both reads run into the adapters.
    Right,
}

impl fmt::Display for AliDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AliDir::Left => write!(f, "left"),
            AliDir::Right => write!(f, "right"),
        }
    }
}

/// An accepted overlap.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlap {
    pub score: i32,
    pub ali_length: usize,
    pub matches: usize,
    pub dir: AliDir,
    pub a_single: usize,
    pub b_single: usize,
}

impl Overlap {
    pub fn identity(&self) -> f64 {
        if self.ali_length == 0 {
            0.0
        } else {
            self.matches as f64 / self.ali_length as f64
        }
    }
}

/// Paired-end assembler with its own alignment arena.
///
/// Not shareable: each worker thread keeps its own.
#[derive(Debug)]
pub struct PeAligner {
    params: PeAlignParams,
    gap: i32,
    seeds: ShiftSearcher,
    scores: Vec<i32>,
    trace: Vec<u8>,
    cols: Vec<(Option<usize>, Option<usize>)>,
    b_seq: Vec<u8>,
    b_qual: Vec<u8>,
}

impl PeAligner {
    pub fn new(params: PeAlignParams) -> Self {
        let gap = (params.gap_penalty * Q40 as f64).round() as i32;
        Self {
            params,
            gap,
            seeds: ShiftSearcher::default(),
            scores: Vec::new(),
            trace: Vec::new(),
            cols: Vec::new(),
            b_seq: Vec::new(),
            b_qual: Vec::new(),
        }
    }

    pub fn params(&self) -> &PeAlignParams {
        &self.params
    }

    /// Assemble a read pair into one record.
    ///
    /// The result keeps the identity and annotations of `a`. Missing quality
    /// scores are taken as Q40.
    pub fn assemble(&mut self, a: &BioRecord, b: &BioRecord) -> Result<BioRecord> {
        self.b_seq.clear();
        self.b_seq.extend_from_slice(b.sequence());
        iupac::reverse_complement_in_place(&mut self.b_seq);
        self.b_qual.clear();
        match b.qualities() {
            Some(q) => self.b_qual.extend(q.iter().rev()),
            None => self.b_qual.resize(b.len(), DEFAULT_QUAL),
        }

        let a_qual = a
            .qualities()
            .map(|q| q.to_vec())
            .unwrap_or_else(|| vec![DEFAULT_QUAL; a.len()]);

        let overlap = self
            .align(a.sequence(), &a_qual)
            .filter(|o| {
                o.ali_length >= self.params.min_overlap && o.identity() >= self.params.min_identity
            });

        let mut out = a.clone();
        out.set_mate(None);

        match overlap {
            Some(o) => {
                let (seq, qual) = self.consensus(a.sequence(), &a_qual, &o);
                out.set_sequence(seq, Some(qual))?;
                out.annotate("mode", "alignment", "pe_align")?;
                if self.params.with_stats {
                    out.annotate("score", o.score as i64, "pe_align")?;
                    out.annotate("ali_length", o.ali_length, "pe_align")?;
                    out.annotate("ali_dir", o.dir.to_string(), "pe_align")?;
                    out.annotate("seq_a_single", o.a_single, "pe_align")?;
                    out.annotate("seq_b_single", o.b_single, "pe_align")?;
                    out.annotate("seq_ab_match", o.matches, "pe_align")?;
                    out.annotate("score_norm", o.identity(), "pe_align")?;
                }
            }
            None => {
                let mut seq = a.sequence().to_vec();
                seq.extend(std::iter::repeat(b'.').take(JOIN_LEN));
                seq.extend_from_slice(&self.b_seq);

                let mut qual = a_qual;
                qual.extend(std::iter::repeat(0).take(JOIN_LEN));
                qual.extend_from_slice(&self.b_qual);

                out.set_sequence(seq, Some(qual))?;
                out.annotate("mode", "join", "pe_align")?;
            }
        }

        Ok(out)
    }

    /// Best overlap alignment of `a` against the reverse-complemented mate
    /// loaded in `b_seq`, or `None` when the band is empty or no seed exists.
    /// Leaves the alignment columns in `cols`.
    fn align(&mut self, a: &[u8], a_qual: &[u8]) -> Option<Overlap> {
        let n = a.len();
        let m = self.b_seq.len();
        if n == 0 || m == 0 {
            return None;
        }

        let (lo_d, hi_d) = if self.params.fast_mode {
            let seed = self
                .seeds
                .best_shift(a, &self.b_seq, self.params.fast_relative_score)?;
            let delta = self.params.delta as isize;
            (seed.shift - delta, seed.shift + delta)
        } else {
            (-(m as isize), n as isize)
        };
        let in_band = |i: usize, j: usize| {
            let d = i as isize - j as isize;
            lo_d <= d && d <= hi_d
        };

        let w = m + 1;
        self.scores.clear();
        self.scores.resize((n + 1) * w, NEG);
        self.trace.clear();
        self.trace.resize((n + 1) * w, START);

        for i in 0..=n {
            for j in 0..=m {
                if !in_band(i, j) {
                    continue;
                }
                let idx = i * w + j;
                if i == 0 || j == 0 {
                    self.scores[idx] = 0;
                    continue;
                }

                let q = a_qual[i - 1].min(self.b_qual[j - 1]) as i32;
                let sub = if a[i - 1] == self.b_seq[j - 1] { q } else { -q };

                let mut best = self.scores[idx - w - 1].saturating_add(sub);
                let mut code = DIAG;
                let up = self.scores[idx - w] - self.gap;
                if up > best {
                    best = up;
                    code = UP;
                }
                let left = self.scores[idx - 1] - self.gap;
                if left > best {
                    best = left;
                    code = LEFT;
                }

                self.scores[idx] = best;
                self.trace[idx] = code;
            }
        }

        // the alignment ends on the last base of one of the reads
        let ends = (1..=m).map(|j| (n, j)).chain((1..n).map(|i| (i, m)));
        let mut end: Option<(usize, usize, i32)> = None;
        for (i, j) in ends {
            let s = self.scores[i * w + j];
            if s > NEG / 2 && end.map_or(true, |(_, _, e)| s > e) {
                end = Some((i, j, s));
            }
        }
        let (i1, j1, score) = end?;

        self.cols.clear();
        let (mut i, mut j) = (i1, j1);
        let mut matches = 0;
        loop {
            match self.trace[i * w + j] {
                DIAG => {
                    if a[i - 1] == self.b_seq[j - 1] {
                        matches += 1;
                    }
                    self.cols.push((Some(i - 1), Some(j - 1)));
                    i -= 1;
                    j -= 1;
                }
                UP => {
                    self.cols.push((Some(i - 1), None));
                    i -= 1;
                }
                LEFT => {
                    self.cols.push((None, Some(j - 1)));
                    j -= 1;
                }
                _ => break,
            }
        }
        self.cols.reverse();
        let (i0, j0) = (i, j);

        let (dir, a_single, b_single) = if j0 == 0 {
            (AliDir::Left, i0 + (n - i1), m - j1)
        } else {
            (AliDir::Right, n - i1, j0 + (m - j1))
        };

        Some(Overlap {
            score,
            ali_length: self.cols.len(),
            matches,
            dir,
            a_single,
            b_single,
        })
    }

    fn consensus(&self, a: &[u8], a_qual: &[u8], o: &Overlap) -> (Vec<u8>, Vec<u8>) {
        let b = &self.b_seq;
        let b_qual = &self.b_qual;
        let mut seq = Vec::with_capacity(a.len() + b.len());
        let mut qual = Vec::with_capacity(a.len() + b.len());

        let first_a = self.cols.iter().find_map(|c| c.0).unwrap_or(0);
        let last_a = self.cols.iter().rev().find_map(|c| c.0).map_or(0, |i| i + 1);
        let last_b = self.cols.iter().rev().find_map(|c| c.1).map_or(0, |j| j + 1);

        if o.dir == AliDir::Left {
            seq.extend_from_slice(&a[..first_a]);
            qual.extend_from_slice(&a_qual[..first_a]);
        }

        for &col in &self.cols {
            let (base, q) = match col {
                (Some(i), Some(j)) => {
                    let (qa, qb) = (a_qual[i], b_qual[j]);
                    if a[i] == b[j] {
                        (a[i], qa.max(qb))
                    } else if qa >= qb {
                        (a[i], qa - qb)
                    } else {
                        (b[j], qb - qa)
                    }
                }
                (Some(i), None) => (a[i], a_qual[i]),
                (None, Some(j)) => (b[j], b_qual[j]),
                (None, None) => unreachable!(),
            };
            seq.push(base);
            qual.push(q);
        }

        if o.dir == AliDir::Left {
            if last_a < a.len() {
                seq.extend_from_slice(&a[last_a..]);
                qual.extend_from_slice(&a_qual[last_a..]);
            } else {
                seq.extend_from_slice(&b[last_b..]);
                qual.extend_from_slice(&b_qual[last_b..]);
            }
        }

        (seq, qual)
    }
}
