use rustc_hash::FxHashMap;

pub const SEED_K: usize = 4;

/// A shared k-mer: position in the indexed sequence and in the scanned one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeedMatch {
    pub pattern_i: usize,
    pub text_i: usize,
}

/// Winning diagonal of a shift vote.
///
/// `shift` is the position in the indexed sequence where the first base of
/// the scanned sequence lands; it is negative when the scanned sequence
/// starts first.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Shift {
    pub shift: isize,
    pub votes: usize,
    pub overlap: usize,
}

/// k-mer diagonal voting between two sequences.
///
/// Holds its hash tables between calls, so one searcher per worker.
#[derive(Debug)]
pub struct ShiftSearcher {
    k: usize,
    index: FxHashMap<u32, Vec<u32>>,
    votes: FxHashMap<isize, usize>,
}

impl Default for ShiftSearcher {
    fn default() -> Self {
        Self::new(SEED_K)
    }
}

impl ShiftSearcher {
    pub fn new(k: usize) -> Self {
        assert!((1..=16).contains(&k), "k-mer size must fit in 32 bits");
        Self {
            k,
            index: FxHashMap::default(),
            votes: FxHashMap::default(),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Index the k-mers of `pattern`, replacing any previous index.
    pub fn index(&mut self, pattern: &[u8]) {
        self.index.values_mut().for_each(|v| v.clear());
        let index = &mut self.index;
        for_each_kmer(pattern, self.k, |kmer, i| {
            index.entry(kmer).or_default().push(i as u32);
        });
    }

    /// Report every k-mer of `text` shared with the indexed sequence.
    pub fn search(&self, text: &[u8], mut candidate_fn: impl FnMut(SeedMatch)) {
        for_each_kmer(text, self.k, |kmer, text_i| {
            if let Some(hits) = self.index.get(&kmer) {
                for &pattern_i in hits {
                    candidate_fn(SeedMatch {
                        pattern_i: pattern_i as usize,
                        text_i,
                    });
                }
            }
        });
    }

    /// Most supported placement of `b` against `a`.
    ///
    /// With `relative`, votes are divided by the overlap length of the
    /// diagonal. Ties go to the larger overlap, then to the smaller shift.
    /// `None` when the sequences share no k-mer.
    pub fn best_shift(&mut self, a: &[u8], b: &[u8], relative: bool) -> Option<Shift> {
        self.index(a);
        self.votes.clear();

        let mut votes = std::mem::take(&mut self.votes);
        self.search(b, |m| {
            *votes.entry(m.pattern_i as isize - m.text_i as isize).or_default() += 1;
        });

        let (la, lb) = (a.len() as isize, b.len() as isize);
        let best = votes
            .iter()
            .map(|(&shift, &votes)| {
                let overlap = if shift >= 0 {
                    (la - shift).min(lb)
                } else {
                    la.min(lb + shift)
                };
                Shift {
                    shift,
                    votes,
                    overlap: overlap.max(1) as usize,
                }
            })
            .max_by(|x, y| {
                let score = |s: &Shift| {
                    if relative {
                        s.votes as f64 / s.overlap as f64
                    } else {
                        s.votes as f64
                    }
                };
                score(x)
                    .total_cmp(&score(y))
                    .then(x.overlap.cmp(&y.overlap))
                    .then(y.shift.cmp(&x.shift))
            });

        self.votes = votes;
        best
    }
}

/// Call `f(kmer, position)` for every k-mer made only of `acgt` (any case).
fn for_each_kmer(seq: &[u8], k: usize, mut f: impl FnMut(u32, usize)) {
    let mask = if k == 16 { u32::MAX } else { (1u32 << (2 * k)) - 1 };
    let mut kmer = 0u32;
    let mut valid = 0;

    for (i, &b) in seq.iter().enumerate() {
        let code = match b {
            b'a' | b'A' => 0,
            b'c' | b'C' => 1,
            b'g' | b'G' => 2,
            b't' | b'T' => 3,
            _ => {
                valid = 0;
                continue;
            }
        };

        kmer = ((kmer << 2) | code) & mask;
        valid += 1;

        if valid >= k {
            f(kmer, i + 1 - k);
        }
    }
}
