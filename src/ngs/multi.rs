use crate::apat::*;
use crate::errors::*;
use crate::ngs::extract::demux_record;
use crate::ngs::*;
use crate::record::BioRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum HitKind {
    Forward,
    ReverseRc,
    Reverse,
    ForwardRc,
}

impl HitKind {
    /// Primer closing an amplicon opened by this one.
    fn closer(self) -> Option<HitKind> {
        match self {
            HitKind::Forward => Some(HitKind::ReverseRc),
            HitKind::Reverse => Some(HitKind::ForwardRc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    marker: usize,
    kind: HitKind,
    m: ApatMatch,
}

impl NgsLibrary {
    /// Cut a read carrying several amplicons into one record per amplicon.
    ///
    /// Every primer occurrence of every marker is located; overlapping
    /// occurrences of the same primer keep the one with fewer errors. Scanning
    /// by start position, each opening primer is paired with the next closing
    /// primer of the same marker. Sub-records are named `<id>_<n>`, in read
    /// order. A read without any primer pair is demultiplexed as a whole.
    pub fn extract_multi(
        &self,
        record: &BioRecord,
        seq: &mut IndexedSequence,
        reorient: bool,
    ) -> Result<Vec<BioRecord>> {
        self.ensure_compiled()?;
        seq.attach(record);

        let mut hits = Vec::new();
        for (i, marker) in self.markers().iter().enumerate() {
            let c = marker.primers_compiled()?;
            let patterns = [
                (HitKind::Forward, &c.forward),
                (HitKind::ReverseRc, &c.reverse_rc),
                (HitKind::Reverse, &c.reverse),
                (HitKind::ForwardRc, &c.forward_rc),
            ];
            for (kind, pattern) in patterns {
                let found = pattern.find_all(seq, 0, usize::MAX);
                hits.extend(found.iter().map(|&m| Hit { marker: i, kind, m }));
            }
        }

        let hits = resolve_overlaps(hits);

        let mut pairs = Vec::new();
        let mut i = 0;
        while i < hits.len() {
            let opener = hits[i];
            let closer = opener.kind.closer().and_then(|kind| {
                (i + 1..hits.len()).find(|&j| {
                    hits[j].marker == opener.marker
                        && hits[j].kind == kind
                        && hits[j].m.start >= opener.m.end
                })
            });

            match closer {
                Some(j) => {
                    pairs.push((opener, hits[j]));
                    i = j + 1;
                }
                None => i += 1,
            }
        }

        if pairs.is_empty() {
            return Ok(vec![self.extract_barcode(record, seq, reorient)?]);
        }

        let mut res = Vec::with_capacity(pairs.len());
        for (n, (opener, closer)) in pairs.into_iter().enumerate() {
            let direction = match opener.kind {
                HitKind::Forward => Direction::Direct,
                _ => Direction::Reverse,
            };
            let m = self.markers()[opener.marker].build_match(seq, direction, opener.m, Some(closer.m));
            let mut out = demux_record(record, &m, reorient)?;
            out.set_id(format!("{}_{}", record.id(), n + 1));
            res.push(out);
        }

        Ok(res)
    }
}

/// Among overlapping occurrences of the same primer keep the one with fewer
/// errors (the leftmost on ties). The result is sorted by start.
fn resolve_overlaps(mut hits: Vec<Hit>) -> Vec<Hit> {
    hits.sort_by_key(|h| (h.marker, h.kind, h.m.start, h.m.end));

    let mut kept: Vec<Hit> = Vec::with_capacity(hits.len());
    for h in hits {
        match kept.last_mut() {
            Some(last) if last.marker == h.marker && last.kind == h.kind && last.m.overlaps(&h.m) => {
                if h.m.errors < last.m.errors {
                    *last = h;
                }
            }
            _ => kept.push(h),
        }
    }

    kept.sort_by_key(|h| (h.m.start, h.marker, h.kind));
    kept
}
