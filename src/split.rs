use crate::apat::*;
use crate::errors::*;
use crate::patterns::Patterns;
use crate::record::BioRecord;

const CONTEXT: &str = "split";

/// Tolerances used to compile split patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitOptions {
    pub errors: usize,
    pub allows_indels: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            errors: 2,
            allows_indels: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitHit {
    pattern: usize,
    m: ApatMatch,
}

/// Cut a read at every occurrence of the split patterns (in both
/// orientations).
///
/// Overlapping occurrences keep the one with fewer errors. The fragments
/// between consecutive occurrences and the read ends are returned in read
/// order, empty ones skipped, each annotated with its flanking patterns and
/// their group (`pcr_pool`). A read without any occurrence is returned as a
/// single fragment.
pub fn split_sequence(
    record: &BioRecord,
    patterns: &Patterns,
    seq: &mut IndexedSequence,
) -> Result<Vec<BioRecord>> {
    seq.attach(record);

    let mut hits = Vec::new();
    for (i, p) in patterns.patterns().iter().enumerate() {
        for pattern in [p.forward(), p.reverse()] {
            let found = pattern.find_all(seq, 0, usize::MAX);
            hits.extend(found.iter().map(|&m| SplitHit { pattern: i, m }));
        }
    }

    hits.sort_by_key(|h| (h.m.start, h.m.errors, h.pattern));
    let mut kept: Vec<SplitHit> = Vec::with_capacity(hits.len());
    for h in hits {
        match kept.last_mut() {
            Some(last) if last.m.overlaps(&h.m) => {
                if h.m.errors < last.m.errors {
                    *last = h;
                }
            }
            _ => kept.push(h),
        }
    }

    let len = record.len();
    let mut bounds = Vec::with_capacity(kept.len() + 2);
    bounds.push(None);
    bounds.extend(kept.iter().map(Some));
    bounds.push(None);

    let fragments: Vec<(Option<&SplitHit>, Option<&SplitHit>, usize, usize)> = bounds
        .windows(2)
        .map(|w| {
            let from = w[0].map_or(0, |h| h.m.end.min(len));
            let to = w[1].map_or(len, |h| h.m.start);
            (w[0], w[1], from, to)
        })
        .filter(|&(_, _, from, to)| from < to)
        .collect();

    let pool = |h: &SplitHit| -> String {
        patterns
            .attr(h.pattern, "pcr_pool")
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| patterns.patterns()[h.pattern].name())
            .to_owned()
    };

    let n = fragments.len();
    let mut res = Vec::with_capacity(n);
    for (i, (left, right, from, to)) in fragments.into_iter().enumerate() {
        let mut frg = record.subsequence(from, to);
        frg.annotate("obisplit_frg", i + 1, CONTEXT)?;
        frg.annotate("obisplit_nfrg", n, CONTEXT)?;
        frg.annotate("obisplit_location", format!("{}..{}", from + 1, to), CONTEXT)?;

        let group = match (left.map(pool), right.map(pool)) {
            (Some(l), Some(r)) if l != r => Some(format!("{l}-{r}")),
            (Some(g), _) | (None, Some(g)) => Some(g),
            (None, None) => None,
        };
        if let Some(group) = group {
            frg.annotate("obisplit_group", group, CONTEXT)?;
        }

        for (side, hit) in [("left", left), ("right", right)] {
            let Some(h) = hit else {
                frg.annotate(format!("obisplit_{side}_pattern"), "extremity", CONTEXT)?;
                continue;
            };
            let matched = &seq.bases()[h.m.start.min(len)..h.m.end.min(len)];
            frg.annotate(
                format!("obisplit_{side}_pattern"),
                patterns.patterns()[h.pattern].name(),
                CONTEXT,
            )?;
            frg.annotate(format!("obisplit_{side}_match"), utf8(matched), CONTEXT)?;
            frg.annotate(format!("obisplit_{side}_error"), h.m.errors, CONTEXT)?;
        }

        res.push(frg);
    }

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iupac;
    use crate::patterns::read_split_config_from_reader;

    const CONFIG: &str = "T-tag,pcr_pool\nccgtacga,poolA\ngaacgtat,poolB\n";

    fn patterns() -> Patterns {
        let options = SplitOptions {
            errors: 1,
            allows_indels: false,
        };
        read_split_config_from_reader(CONFIG.as_bytes(), "split.csv", &options).unwrap()
    }

    #[test]
    fn test_two_hits_same_pool() {
        // tag, 40 bp, tag (reverse complemented), 30 bp
        let mut s = b"ccgtacga".to_vec();
        s.extend([b't'; 40]);
        s.extend(iupac::reverse_complement(b"ccgtacga"));
        s.extend([b'a'; 30]);
        let record = BioRecord::new("r", &s);

        let mut seq = IndexedSequence::new();
        let frgs = split_sequence(&record, &patterns(), &mut seq).unwrap();

        assert_eq!(frgs.len(), 2);
        assert_eq!(frgs[0].sequence(), &[b't'; 40][..]);
        assert_eq!(frgs[1].sequence(), &[b'a'; 30][..]);
        for (i, f) in frgs.iter().enumerate() {
            let a = f.annotations();
            assert_eq!(a.get_int("obisplit_frg"), Some(i as i64 + 1));
            assert_eq!(a.get_int("obisplit_nfrg"), Some(2));
            assert_eq!(a.get_str("obisplit_group"), Some("poolA"));
        }
        assert_eq!(frgs[0].annotations().get_str("obisplit_location"), Some("9..48"));
        assert_eq!(frgs[0].annotations().get_str("obisplit_right_match"), Some("tcgtacgg"));
        assert_eq!(frgs[1].annotations().get_str("obisplit_right_pattern"), Some("extremity"));
        assert_eq!(frgs[1].annotations().get_int("obisplit_left_error"), Some(0));
    }

    #[test]
    fn test_mixed_pools_and_errors() {
        let mut s = [b'g'; 20].to_vec();
        // one mismatch in the first tag
        s.extend(b"ccgtaaga");
        s.extend([b't'; 25]);
        s.extend(b"gaacgtat");
        let record = BioRecord::new("r", &s);

        let mut seq = IndexedSequence::new();
        let frgs = split_sequence(&record, &patterns(), &mut seq).unwrap();

        assert_eq!(frgs.len(), 2);
        assert_eq!(frgs[0].annotations().get_str("obisplit_group"), Some("poolA"));
        assert_eq!(frgs[0].annotations().get_str("obisplit_left_pattern"), Some("extremity"));
        assert_eq!(frgs[1].annotations().get_str("obisplit_group"), Some("poolA-poolB"));
        assert_eq!(frgs[1].annotations().get_int("obisplit_left_error"), Some(1));
        assert_eq!(frgs[1].len(), 25);
    }

    #[test]
    fn test_no_hit() {
        let record = BioRecord::new("r", [b't'; 30]);
        let mut seq = IndexedSequence::new();
        let frgs = split_sequence(&record, &patterns(), &mut seq).unwrap();
        assert_eq!(frgs.len(), 1);
        assert_eq!(frgs[0].len(), 30);
        assert!(!frgs[0].has_annotation("obisplit_group"));
        assert_eq!(frgs[0].annotations().get_int("obisplit_nfrg"), Some(1));
    }
}
