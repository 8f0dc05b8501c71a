use crate::apat::*;
use crate::iupac;

const INF: u32 = u32::MAX / 2;

impl ApatPattern {
    /// Bit-parallel scan with mismatches only: every hit is a window of
    /// exactly the pattern length.
    pub(crate) fn search_substitutions(&self, seq: &mut IndexedSequence, start: usize, end: usize) {
        let m = self.len();
        let k = self.max_errors();
        let hit_bit = 1u64 << (m - 1);

        seq.states.clear();
        seq.states.resize(k + 1, 0);

        for pos in start..end {
            let b = self.accept(seq.masks[pos]);
            let r = &mut seq.states;

            let mut prev_old = r[0];
            r[0] = ((r[0] << 1) | 1) & b;
            for j in 1..=k {
                let old = r[j];
                r[j] = (((old << 1) | 1) & b) | ((prev_old << 1) | 1);
                prev_old = old;
            }

            if let Some(errors) = r.iter().position(|s| s & hit_bit != 0) {
                let s = pos + 1 - m;
                if seq.valid_start(s) {
                    seq.hits.push(ApatMatch {
                        start: s,
                        end: pos + 1,
                        errors,
                    });
                }
            }
        }
    }

    /// Edit-distance search.
    ///
    /// The bit-parallel automaton marks every end position reachable with at
    /// most `k` edits; each start position that could produce one of those ends
    /// is then resolved with a banded alignment. An alignment is reported when
    /// it is the best one for its start and also the best one for its end
    /// (fewest errors, longest span on ties), so the hits on a sequence mirror
    /// the hits of the reverse-complemented pattern on its reverse complement.
    pub(crate) fn search_indels(&self, seq: &mut IndexedSequence, start: usize, end: usize) {
        let m = self.len();
        let k = self.max_errors();
        let hit_bit = 1u64 << (m - 1);

        seq.states.clear();
        seq.states.extend((0..=k).map(|j| (1u64 << j) - 1));
        seq.ends.clear();

        for pos in start..end {
            let b = self.accept(seq.masks[pos]);
            let r = &mut seq.states;

            let mut prev_old = r[0];
            r[0] = ((r[0] << 1) | 1) & b;
            let mut prev_new = r[0];
            for j in 1..=k {
                let old = r[j];
                r[j] = (((old << 1) | 1) & b)
                    | ((prev_old << 1) | 1)
                    | ((prev_new << 1) | 1)
                    | prev_old;
                prev_old = old;
                prev_new = r[j];
            }

            if r[k] & hit_bit != 0 {
                seq.ends.push(pos + 1);
            }
        }

        // candidate starts, sorted and unique
        seq.starts.clear();
        for &e in &seq.ends {
            let lo = e.saturating_sub(m + k).max(start);
            let hi = (e + k).saturating_sub(m).min(e - 1);
            let from = seq.starts.last().map_or(lo, |&last| lo.max(last + 1));
            seq.starts.extend(from..=hi);
        }

        // best (start, errors) per end, indexed from `start`
        seq.end_best.clear();
        seq.end_best.resize(end - start + 1, (usize::MAX, usize::MAX));

        let lo = m.saturating_sub(k);
        let mut i = 0;
        while i < seq.starts.len() {
            let s = seq.starts[i];
            i += 1;
            if !seq.valid_start(s) {
                continue;
            }
            let Some(n) = self.align_from(seq, s, end) else {
                continue;
            };

            let hi = (m + k).min(n);
            let mut best: Option<(usize, usize)> = None;
            for (j, &d) in seq.row_prev.iter().enumerate().take(hi + 1).skip(lo) {
                let d = d as usize;
                if d > k {
                    continue;
                }
                if best.map_or(true, |(_, e)| d <= e) {
                    best = Some((j, d));
                }
                // starts arrive in increasing order: the first keeps the tie
                let slot = &mut seq.end_best[s + j - start];
                if d < slot.1 {
                    *slot = (s, d);
                }
            }

            if let Some((len, errors)) = best {
                seq.hits.push(ApatMatch {
                    start: s,
                    end: s + len,
                    errors,
                });
            }
        }

        let end_best = &seq.end_best;
        seq.hits.retain(|h| end_best[h.end - start] == (h.start, h.errors));
    }

    /// Banded alignment of the whole pattern against the target from `s`,
    /// stopping before `limit`. On return `seq.row_prev[j]` is the edit
    /// distance to the `j` bases after `s`; returns how many bases were
    /// considered, or `None` when the target is too short.
    fn align_from(&self, seq: &mut IndexedSequence, s: usize, limit: usize) -> Option<usize> {
        let m = self.len();
        let k = self.max_errors();
        let text = &seq.masks[s..limit.min(s + m + k)];
        let n = text.len();
        if n + k < m {
            return None;
        }

        let prev = &mut seq.row_prev;
        let curr = &mut seq.row_curr;
        prev.clear();
        prev.resize(n + 1, INF);
        curr.clear();
        curr.resize(n + 1, INF);

        for (j, cell) in prev.iter_mut().enumerate().take(k.min(n) + 1) {
            *cell = j as u32;
        }

        for (i, &pm) in self.masks().iter().enumerate() {
            let i = i + 1;
            let lo = i.saturating_sub(k);
            let hi = (i + k).min(n);

            curr.iter_mut().for_each(|c| *c = INF);
            if lo == 0 {
                curr[0] = i as u32;
            }

            for j in lo.max(1)..=hi {
                let cost = (pm & text[j - 1] & iupac::ANY == 0) as u32;
                curr[j] = (prev[j - 1] + cost).min(prev[j] + 1).min(curr[j - 1] + 1);
            }

            std::mem::swap(prev, curr);
        }

        Some(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn search(pattern: &str, k: usize, indels: bool, seq: &[u8]) -> Vec<ApatMatch> {
        let p = ApatPattern::compile(pattern, k, indels).unwrap();
        let mut s = IndexedSequence::new();
        s.attach_bytes(seq, false);
        p.find_all(&mut s, 0, usize::MAX).to_vec()
    }

    fn m(start: usize, end: usize, errors: usize) -> ApatMatch {
        ApatMatch { start, end, errors }
    }

    fn edit_distance(p: &[u8], t: &[u8]) -> usize {
        let mut prev: Vec<usize> = (0..=t.len()).collect();
        for i in 1..=p.len() {
            let mut curr = vec![i; t.len() + 1];
            for j in 1..=t.len() {
                let cost = (p[i - 1] & t[j - 1] == 0) as usize;
                curr[j] = (prev[j - 1] + cost).min(prev[j] + 1).min(curr[j - 1] + 1);
            }
            prev = curr;
        }
        prev[t.len()]
    }

    fn naive(p: &ApatPattern, seq: &[u8]) -> Vec<ApatMatch> {
        let pm = p.masks();
        let t: Vec<u8> = seq.iter().map(|&b| iupac::mask(b)).collect();
        let (mlen, k) = (pm.len(), p.max_errors());
        let mut out = Vec::new();

        for s in 0..t.len() {
            if !p.allows_indels() {
                if s + mlen > t.len() {
                    break;
                }
                let errors = (0..mlen).filter(|&i| pm[i] & t[s + i] == 0).count();
                if errors <= k {
                    out.push(m(s, s + mlen, errors));
                }
                continue;
            }

            let mut best: Option<(usize, usize)> = None;
            for l in mlen - k..=mlen + k {
                if s + l > t.len() {
                    break;
                }
                let d = edit_distance(pm, &t[s..s + l]);
                if d <= k && best.map_or(true, |(_, e)| d <= e) {
                    best = Some((l, d));
                }
            }
            if let Some((l, d)) = best {
                out.push(m(s, s + l, d));
            }
        }

        if p.allows_indels() {
            // an alignment must also be the longest of the best ones ending there
            out.retain(|h| {
                let best_for_end = (h.end.saturating_sub(mlen + k)..h.end)
                    .filter(|&s| h.end - s >= mlen - k)
                    .map(|s| (edit_distance(pm, &t[s..h.end]), s))
                    .min();
                best_for_end == Some((h.errors, h.start))
            });
        }

        out
    }

    #[test]
    fn test_exact_and_substitutions() {
        assert_eq!(search("ACGT", 0, false, b"ttacgtacgt"), vec![m(2, 6, 0), m(6, 10, 0)]);
        assert_eq!(search("ACGT", 0, false, b"ttacgnacgt"), vec![m(2, 6, 0), m(6, 10, 0)]);
        assert_eq!(search("ACGT", 1, false, b"ACGTTTTACCT"), vec![m(0, 4, 0), m(7, 11, 1)]);
    }

    #[test]
    fn test_one_mismatch_window() {
        // only aagtt differs from acgtt by a single substitution
        assert_eq!(search("ACGTT", 1, false, b"ttaagttcc"), vec![m(2, 7, 1)]);
    }

    #[test]
    fn test_indel_tie_prefers_longest_span() {
        assert_eq!(search("AACGT", 1, true, b"AACTGT"), vec![m(0, 6, 1)]);
    }

    #[test]
    fn test_iupac_pattern_matches_exactly() {
        assert_eq!(search("ACRT", 0, false, b"acgtacct"), vec![m(0, 4, 0)]);
        assert_eq!(search("A[CT]GT", 0, false, b"atgtacgt"), vec![m(0, 4, 0), m(4, 8, 0)]);
    }

    #[test]
    fn test_window_bounds() {
        let p = ApatPattern::compile("ACGT", 0, false).unwrap();
        let mut s = IndexedSequence::new();
        s.attach_bytes(b"acgtacgtacgt", false);
        assert_eq!(p.find_all(&mut s, 1, 8), &[m(4, 8, 0)]);
        assert!(p.find_all(&mut s, 4, 3).is_empty());
        assert!(p.find_all(&mut s, 20, 5).is_empty());
    }

    #[test]
    fn test_circular() {
        let p = ApatPattern::compile("GTAC", 0, false).unwrap();
        let mut s = IndexedSequence::new();
        s.attach_bytes(b"accccgt", true);
        assert_eq!(p.find_all(&mut s, 0, usize::MAX), &[m(5, 9, 0)]);

        s.attach_bytes(b"accccgt", false);
        assert!(!p.is_matching(&mut s, 0, usize::MAX));
    }

    #[test]
    fn test_best_match() {
        let p = ApatPattern::compile("ACGTAC", 2, true).unwrap();
        let mut s = IndexedSequence::new();
        s.attach_bytes(b"ttacgaacgggacgtacttt", false);
        let best = p.best_match(&mut s, 0, usize::MAX).unwrap();
        assert_eq!((best.start, best.errors), (11, 0));
    }

    #[test]
    fn test_zero_error_match_is_exact() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        for _ in 0..200 {
            let seq: Vec<u8> = (0..40).map(|_| b"acgtn"[rng.gen_range(0..5)]).collect();
            let p = ApatPattern::compile("ACNT", 0, false).unwrap();
            let mut s = IndexedSequence::new();
            s.attach_bytes(&seq, false);
            for hit in p.find_all(&mut s, 0, usize::MAX) {
                assert_eq!(hit.errors, 0);
                assert!(seq[hit.start..hit.end]
                    .iter()
                    .zip(b"acnt")
                    .all(|(&a, &b)| iupac::compatible(a, b)));
            }
        }
    }

    #[test]
    fn test_matches_naive_oracle() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let codes = b"acgtrymn";

        for round in 0..400 {
            let plen = rng.gen_range(3..12);
            let pattern: String = (0..plen)
                .map(|_| {
                    let c = if rng.gen_bool(0.85) {
                        b"acgt"[rng.gen_range(0..4)]
                    } else {
                        codes[rng.gen_range(0..codes.len())]
                    };
                    c as char
                })
                .collect();
            let k = rng.gen_range(0..3.min(plen));
            let indels = round % 2 == 0;
            let seq: Vec<u8> = (0..rng.gen_range(0..80))
                .map(|_| {
                    if rng.gen_bool(0.02) {
                        b'n'
                    } else {
                        b"acgt"[rng.gen_range(0..4)]
                    }
                })
                .collect();

            let p = ApatPattern::compile(&pattern, k, indels).unwrap();
            let mut s = IndexedSequence::new();
            s.attach_bytes(&seq, false);
            let found = p.find_all(&mut s, 0, usize::MAX).to_vec();
            assert_eq!(
                found,
                naive(&p, &seq),
                "pattern {} k={} indels={} seq {}",
                pattern,
                k,
                indels,
                String::from_utf8_lossy(&seq)
            );
        }
    }

    #[test]
    fn test_reverse_complement_symmetry() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);

        for round in 0..400 {
            let indels = round % 2 == 1;
            let pattern: String = (0..8).map(|_| b"acgtr"[rng.gen_range(0..5)] as char).collect();
            let seq: Vec<u8> = (0..60).map(|_| b"acgt"[rng.gen_range(0..4)]).collect();
            let rc_seq = iupac::reverse_complement(&seq);

            let p = ApatPattern::compile(&pattern, 2, indels).unwrap();
            let rc = p.reverse_complement();
            let mut s = IndexedSequence::new();

            s.attach_bytes(&seq, false);
            let mut direct = rc.find_all(&mut s, 0, usize::MAX).to_vec();
            s.attach_bytes(&rc_seq, false);
            let mut mirrored: Vec<ApatMatch> = p
                .find_all(&mut s, 0, usize::MAX)
                .iter()
                .map(|h| m(seq.len() - h.end, seq.len() - h.start, h.errors))
                .collect();

            direct.sort_by_key(|h| h.start);
            mirrored.sort_by_key(|h| h.start);
            assert_eq!(
                direct,
                mirrored,
                "pattern {} indels={} seq {}",
                pattern,
                indels,
                String::from_utf8_lossy(&seq)
            );
        }
    }

    #[test]
    fn test_indel_hit_is_best_for_its_end() {
        assert_eq!(search("AACGT", 1, true, b"AACTGT"), vec![m(0, 6, 1)]);
        // 2..6 also aligns with one edit from its start, but 0..6 is longer
        assert_eq!(search("ACGTT", 1, true, b"ACAGTT"), vec![m(0, 6, 1)]);
    }
}
