use std::fmt;

use crate::apat::*;
use crate::errors::*;
use crate::iupac;
use crate::ngs::library::CompiledPrimers;
use crate::ngs::*;
use crate::record::{BioRecord, Side};

const CONTEXT: &str = "demultiplex";

/// Orientation of the amplicon in the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Forward primer first.
    Direct,
    /// Reverse primer first.
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Direct => write!(f, "direct"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

/// Why a read could not be assigned. Recorded in `demultiplex_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxFailure {
    NoPrimer,
    MissingPrimer(Side),
    Dimer,
    TagNotFound(Side),
    Unassigned,
}

impl fmt::Display for DemuxFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |s: &Side| match s {
            Side::Forward => "forward",
            Side::Reverse => "reverse",
        };
        match self {
            DemuxFailure::NoPrimer => write!(f, "no primer match"),
            DemuxFailure::MissingPrimer(s) => write!(f, "{} primer not found", side(s)),
            DemuxFailure::Dimer => write!(f, "primer dimer"),
            DemuxFailure::TagNotFound(s) => write!(f, "cannot extract the {} tag", side(s)),
            DemuxFailure::Unassigned => write!(f, "cannot assign the sequence to a sample"),
        }
    }
}

/// A primer occurrence. `matched` is given in the primer's own orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimerMatch {
    pub start: usize,
    pub end: usize,
    pub errors: usize,
    pub matched: Vec<u8>,
}

impl PrimerMatch {
    fn new(seq: &IndexedSequence, hit: ApatMatch, rc: bool) -> Self {
        let bases = &seq.bases()[hit.start..hit.end];
        Self {
            start: hit.start,
            end: hit.end,
            errors: hit.errors,
            matched: if rc {
                iupac::reverse_complement(bases)
            } else {
                bases.to_vec()
            },
        }
    }
}

/// Outcome of matching one read against the library.
#[derive(Debug, Clone)]
pub struct DemuxMatch<'a> {
    pub marker: Option<&'a Marker>,
    pub direction: Direction,
    pub forward: Option<PrimerMatch>,
    pub reverse: Option<PrimerMatch>,
    pub forward_tag: Option<Vec<u8>>,
    pub reverse_tag: Option<Vec<u8>>,
    /// Amplicon between the primers, in read coordinates.
    pub barcode: Option<(usize, usize)>,
    pub pcr: Option<&'a Pcr>,
    pub failure: Option<DemuxFailure>,
}

impl<'a> DemuxMatch<'a> {
    fn unmatched() -> Self {
        Self {
            marker: None,
            direction: Direction::Direct,
            forward: None,
            reverse: None,
            forward_tag: None,
            reverse_tag: None,
            barcode: None,
            pcr: None,
            failure: Some(DemuxFailure::NoPrimer),
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.failure.is_none() && self.pcr.is_some()
    }
}

/// Tag offsets to try, closest to the expected position first.
fn tag_offsets(max_shift: usize) -> impl Iterator<Item = isize> {
    std::iter::once(0).chain((1..=max_shift as isize).flat_map(|o| [o, -o]))
}

impl Marker {
    pub(crate) fn primers_compiled(&self) -> Result<&CompiledPrimers> {
        self.compiled.as_ref().ok_or_else(|| Error::InvalidParameter {
            parameter: "marker",
            reason: format!("marker {} is not compiled", self.primers()),
        })
    }

    /// Run the primer and tag state machine on an attached sequence.
    ///
    /// The forward primer is tried first, then the reverse complement of the
    /// reverse primer after it. Failing that, the reverse primer is tried
    /// first and the read is in reverse direction.
    pub fn match_sequence(&self, seq: &mut IndexedSequence) -> Result<DemuxMatch<'_>> {
        let c = self.primers_compiled()?;

        let begin = |side: Side| {
            let o = self.options().side(side);
            o.delimiter_len() + self.tag_len(side) + o.spacer
        };

        if let Some(hit) = c.forward.best_match(seq, begin(Side::Forward), usize::MAX) {
            let closer = c.reverse_rc.best_match(seq, hit.end, usize::MAX);
            return Ok(self.build_match(seq, Direction::Direct, hit, closer));
        }

        if let Some(hit) = c.reverse.best_match(seq, begin(Side::Reverse), usize::MAX) {
            let closer = c.forward_rc.best_match(seq, hit.end, usize::MAX);
            return Ok(self.build_match(seq, Direction::Reverse, hit, closer));
        }

        Ok(DemuxMatch::unmatched())
    }

    /// Assemble a match from an opening primer hit (forward for direct reads,
    /// reverse for reverse reads) and the reverse-complemented closing primer.
    pub(crate) fn build_match(
        &self,
        seq: &IndexedSequence,
        direction: Direction,
        opener: ApatMatch,
        closer: Option<ApatMatch>,
    ) -> DemuxMatch<'_> {
        let (first, second) = match direction {
            Direction::Direct => (Side::Forward, Side::Reverse),
            Direction::Reverse => (Side::Reverse, Side::Forward),
        };

        let first_tag = self.tag_before(seq, first, opener.start);
        let first_hit = PrimerMatch::new(seq, opener, false);
        let second_hit = closer.map(|h| PrimerMatch::new(seq, h, true));
        let second_tag = closer.and_then(|h| self.tag_after(seq, second, h.end));

        let mut m = DemuxMatch {
            marker: Some(self),
            direction,
            forward: None,
            reverse: None,
            forward_tag: None,
            reverse_tag: None,
            barcode: closer.map(|h| (opener.end, h.start)),
            pcr: None,
            failure: None,
        };

        match direction {
            Direction::Direct => {
                m.forward = Some(first_hit);
                m.forward_tag = first_tag;
                m.reverse = second_hit;
                m.reverse_tag = second_tag;
            }
            Direction::Reverse => {
                m.reverse = Some(first_hit);
                m.reverse_tag = first_tag;
                m.forward = second_hit;
                m.forward_tag = second_tag;
            }
        }

        self.assign(&mut m, first, opener.end, seq.len());
        m
    }

    fn assign<'a>(&'a self, m: &mut DemuxMatch<'a>, first: Side, opener_end: usize, len: usize) {
        let second = match first {
            Side::Forward => Side::Reverse,
            Side::Reverse => Side::Forward,
        };
        let forward_tag = m.forward_tag.clone();
        let reverse_tag = m.reverse_tag.clone();

        let Some((start, end)) = m.barcode else {
            // one primer only: a partial PCR may still claim the read
            let first_tag = match first {
                Side::Forward => forward_tag,
                Side::Reverse => reverse_tag,
            };
            let partial = first_tag.and_then(|t| self.partial_pcr(first, &t));
            match partial {
                Some((_, pcr)) => {
                    m.pcr = Some(pcr);
                    m.barcode = Some((opener_end, len));
                }
                None => m.failure = Some(DemuxFailure::MissingPrimer(second)),
            }
            return;
        };

        if start >= end {
            m.failure = Some(DemuxFailure::Dimer);
            return;
        }

        let (Some(forward), Some(reverse)) = (forward_tag, reverse_tag) else {
            let missing = if m.forward_tag.is_none() {
                Side::Forward
            } else {
                Side::Reverse
            };
            m.failure = Some(DemuxFailure::TagNotFound(missing));
            return;
        };

        match self.samples().get(&TagPair { forward, reverse }) {
            Some(pcr) => m.pcr = Some(pcr),
            None => m.failure = Some(DemuxFailure::Unassigned),
        }
    }

    /// Tag located before a primer starting at `primer_start`, read as is.
    fn tag_before(&self, seq: &IndexedSequence, side: Side, primer_start: usize) -> Option<Vec<u8>> {
        let len = self.tag_len(side);
        if len == 0 {
            return Some(Vec::new());
        }

        let opts = self.options().side(side);
        let bases = seq.bases();
        let nominal = primer_start as isize - (opts.spacer + len) as isize;
        let mut fallback = None;

        for shift in tag_offsets(opts.tag_indels) {
            let ts = nominal + shift;
            if ts < opts.delimiter_len() as isize {
                continue;
            }
            let ts = ts as usize;
            if ts + len > primer_start {
                continue;
            }
            if opts.tag_delimiter != 0 && bases[ts - 1] != opts.tag_delimiter {
                continue;
            }

            let tag = &bases[ts..ts + len];
            if self.known_tags(side).contains(tag) {
                return Some(tag.to_vec());
            }
            fallback.get_or_insert_with(|| tag.to_vec());
        }

        fallback
    }

    /// Tag located after a reverse-complemented primer ending at
    /// `primer_end`, returned in the primer's orientation.
    fn tag_after(&self, seq: &IndexedSequence, side: Side, primer_end: usize) -> Option<Vec<u8>> {
        let len = self.tag_len(side);
        if len == 0 {
            return Some(Vec::new());
        }

        let opts = self.options().side(side);
        let bases = seq.bases();
        let nominal = (primer_end + opts.spacer) as isize;
        let delimiter = iupac::complement(opts.tag_delimiter);
        let mut fallback = None;

        for shift in tag_offsets(opts.tag_indels) {
            let ts = nominal + shift;
            if ts < primer_end as isize {
                continue;
            }
            let ts = ts as usize;
            if ts + len + opts.delimiter_len() > bases.len() {
                continue;
            }
            if opts.tag_delimiter != 0 && bases[ts + len] != delimiter {
                continue;
            }

            let tag = iupac::reverse_complement(&bases[ts..ts + len]);
            if self.known_tags(side).contains(&tag) {
                return Some(tag);
            }
            fallback.get_or_insert(tag);
        }

        fallback
    }
}

impl NgsLibrary {
    /// Match an attached sequence against every marker, in insertion order.
    /// The first marker with a primer hit owns the result.
    pub fn match_sequence(&self, seq: &mut IndexedSequence) -> Result<DemuxMatch<'_>> {
        self.ensure_compiled()?;

        for marker in self.markers() {
            let m = marker.match_sequence(seq)?;
            if m.forward.is_some() || m.reverse.is_some() {
                return Ok(m);
            }
        }

        Ok(DemuxMatch::unmatched())
    }

    /// Demultiplex one read.
    ///
    /// An assigned read is cut down to the amplicon between the primers
    /// (reverse complemented when `reorient` is set and the read is in
    /// reverse direction) and annotated with its primers, tags and sample.
    /// Otherwise the read is returned whole with a `demultiplex_error`.
    pub fn extract_barcode(
        &self,
        record: &BioRecord,
        seq: &mut IndexedSequence,
        reorient: bool,
    ) -> Result<BioRecord> {
        seq.attach(record);
        let m = self.match_sequence(seq)?;
        demux_record(record, &m, reorient)
    }
}

/// Build the output record of a match.
pub(crate) fn demux_record(record: &BioRecord, m: &DemuxMatch, reorient: bool) -> Result<BioRecord> {
    let mut out = match (m.failure, m.barcode) {
        (None, Some((start, end))) => {
            let mut out = record.subsequence(start, end);
            if reorient && m.direction == Direction::Reverse {
                out.reverse_complement_in_place();
            }
            out
        }
        (Some(DemuxFailure::Dimer), _) => record.subsequence(0, 0),
        _ => record.subsequence(0, record.len()),
    };

    if let Some(marker) = m.marker {
        out.annotate("forward_primer", marker.primers().forward.as_str(), CONTEXT)?;
        out.annotate("reverse_primer", marker.primers().reverse.as_str(), CONTEXT)?;
    }

    let sides = [
        ("forward", &m.forward, &m.forward_tag),
        ("reverse", &m.reverse, &m.reverse_tag),
    ];
    for (side, hit, tag) in sides {
        if let Some(hit) = hit {
            out.annotate(format!("{side}_match"), utf8(&hit.matched), CONTEXT)?;
            out.annotate(format!("{side}_error"), hit.errors, CONTEXT)?;
        }
        if let Some(tag) = tag.as_ref().filter(|t| !t.is_empty()) {
            out.annotate(format!("{side}_tag"), utf8(tag), CONTEXT)?;
        }
    }

    if m.forward.is_some() || m.reverse.is_some() {
        out.annotate("direction", m.direction.to_string(), CONTEXT)?;
    }

    if let Some(pcr) = m.pcr {
        out.annotate("sample", pcr.sample.as_str(), CONTEXT)?;
        out.annotate("experiment", pcr.experiment.as_str(), CONTEXT)?;
        out.annotations_mut()
            .extend_from(&pcr.annotations)
            .map_err(|source| Error::Annotation {
                source,
                id: record.id().to_owned(),
                context: CONTEXT,
            })?;
    }

    if let Some(failure) = m.failure {
        out.annotate("demultiplex_error", failure.to_string(), CONTEXT)?;
    }

    let len = out.len();
    out.annotate("seq_length", len, CONTEXT)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FWD: &str = "GGGCAATCCTGAGCCAA";
    const REV: &str = "CCATTGAGTCTCTGCACC";
    const INSERT: &str = "atcctgttttccaaaaaacaaaggttcagaaagaaaaaaaa";

    fn library(options: impl FnOnce(&mut MarkerOptions)) -> NgsLibrary {
        let mut lib = NgsLibrary::new();
        options(lib.defaults_mut());
        let primers = PrimerPair::new(FWD, REV);
        lib.add_pcr(primers.clone(), TagPair::new("acacacac", "gtgtgtgt"), Pcr::new("exp", "s1"))
            .unwrap();
        lib.add_pcr(primers, TagPair::new("agcgagct", "gtgtgtgt"), Pcr::new("exp", "s2"))
            .unwrap();
        lib.compile().unwrap();
        lib
    }

    /// tag + forward + insert + rc(reverse) + rc(tag)
    fn direct_read(ftag: &str, rtag: &str) -> Vec<u8> {
        let mut read = format!("{ftag}{FWD}{INSERT}").into_bytes();
        read.extend(iupac::reverse_complement(REV.as_bytes()));
        read.extend(iupac::reverse_complement(rtag.as_bytes()));
        read.to_ascii_lowercase()
    }

    #[test]
    fn test_direct_assignment() {
        let lib = library(|_| ());
        let mut seq = IndexedSequence::new();
        let read = BioRecord::new("r1", direct_read("agcgagct", "gtgtgtgt"));
        let out = lib.extract_barcode(&read, &mut seq, true).unwrap();
        let ann = out.annotations();

        assert_eq!(out.sequence(), INSERT.as_bytes());
        assert_eq!(ann.get_str("sample"), Some("s2"));
        assert_eq!(ann.get_str("direction"), Some("direct"));
        assert_eq!(ann.get_str("forward_tag"), Some("agcgagct"));
        assert_eq!(ann.get_str("reverse_tag"), Some("gtgtgtgt"));
        assert_eq!(ann.get_int("forward_error"), Some(0));
        assert_eq!(ann.get_str("reverse_match"), Some(REV.to_ascii_lowercase().as_str()));
        assert_eq!(ann.get_int("seq_length"), Some(INSERT.len() as i64));
        assert!(!ann.contains("demultiplex_error"));
    }

    #[test]
    fn test_reverse_read_is_reoriented() {
        let lib = library(|_| ());
        let mut seq = IndexedSequence::new();
        let read = BioRecord::new("r1", direct_read("acacacac", "gtgtgtgt")).reverse_complement();

        let out = lib.extract_barcode(&read, &mut seq, true).unwrap();
        assert_eq!(out.annotations().get_str("direction"), Some("reverse"));
        assert_eq!(out.annotations().get_str("sample"), Some("s1"));
        assert_eq!(out.sequence(), INSERT.as_bytes());

        let out = lib.extract_barcode(&read, &mut seq, false).unwrap();
        assert_eq!(out.sequence(), &iupac::reverse_complement(INSERT.as_bytes())[..]);
    }

    #[test]
    fn test_unknown_tag_pair() {
        let lib = library(|_| ());
        let mut seq = IndexedSequence::new();
        let read = BioRecord::new("r1", direct_read("agcgagct", "aaaaaaaa"));
        let out = lib.extract_barcode(&read, &mut seq, true).unwrap();

        assert_eq!(
            out.annotations().get_str("demultiplex_error"),
            Some("cannot assign the sequence to a sample")
        );
        assert_eq!(out.sequence(), read.sequence());
        assert!(!out.has_annotation("sample"));
    }

    #[test]
    fn test_no_primer_and_missing_primer() {
        let lib = library(|_| ());
        let mut seq = IndexedSequence::new();

        let out = lib
            .extract_barcode(&BioRecord::new("r", INSERT), &mut seq, true)
            .unwrap();
        assert_eq!(out.annotations().get_str("demultiplex_error"), Some("no primer match"));

        let read = BioRecord::new("r", format!("acacacac{FWD}{INSERT}"));
        let out = lib.extract_barcode(&read, &mut seq, true).unwrap();
        assert_eq!(
            out.annotations().get_str("demultiplex_error"),
            Some("reverse primer not found")
        );
        assert_eq!(out.annotations().get_str("forward_tag"), Some("acacacac"));
    }

    #[test]
    fn test_dimer() {
        let lib = library(|_| ());
        let mut seq = IndexedSequence::new();
        let mut read = format!("acacacac{FWD}").into_bytes();
        read.extend(iupac::reverse_complement(REV.as_bytes()));
        read.extend(b"acacacac");

        let out = lib
            .extract_barcode(&BioRecord::new("r", read), &mut seq, true)
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(out.annotations().get_str("demultiplex_error"), Some("primer dimer"));
    }

    #[test]
    fn test_delimiter_and_tag_shift() {
        let lib = library(|o| {
            o.forward.tag_delimiter = b'c';
            o.forward.tag_indels = 1;
        });
        let mut seq = IndexedSequence::new();

        // delimiter + tag + one extra base before the primer
        let read = BioRecord::new("r", direct_read("cagcgagctt", "gtgtgtgt"));
        let out = lib.extract_barcode(&read, &mut seq, true).unwrap();
        assert_eq!(out.annotations().get_str("sample"), Some("s2"));

        // wrong delimiter
        let read = BioRecord::new("r", direct_read("aagcgagct", "gtgtgtgt"));
        let out = lib.extract_barcode(&read, &mut seq, true).unwrap();
        assert_eq!(
            out.annotations().get_str("demultiplex_error"),
            Some("cannot extract the forward tag")
        );
    }

    #[test]
    fn test_partial_pcr() {
        let mut lib = NgsLibrary::new();
        let mut pcr = Pcr::new("exp", "partial");
        pcr.partial = true;
        lib.add_pcr(PrimerPair::new(FWD, REV), TagPair::new("ttttcccc", "aaaagggg"), pcr)
            .unwrap();
        lib.compile().unwrap();

        let mut seq = IndexedSequence::new();
        let read = BioRecord::new("r", format!("ttttcccc{FWD}{INSERT}"));
        let out = lib.extract_barcode(&read, &mut seq, true).unwrap();
        assert_eq!(out.annotations().get_str("sample"), Some("partial"));
        assert_eq!(out.sequence(), INSERT.as_bytes());
        assert!(!out.has_annotation("reverse_match"));
    }

    #[test]
    fn test_deterministic() {
        let lib = library(|_| ());
        let mut seq = IndexedSequence::new();
        let read = BioRecord::new("r1", direct_read("agcgagct", "gtgtgtgt"));
        let first = lib.extract_barcode(&read, &mut seq, true).unwrap();
        for _ in 0..10 {
            assert_eq!(lib.extract_barcode(&read, &mut seq, true).unwrap(), first);
        }
    }

    #[test]
    fn test_uncompiled_library() {
        let mut lib = NgsLibrary::new();
        lib.add_pcr(PrimerPair::new(FWD, REV), TagPair::default(), Pcr::new("e", "s"))
            .unwrap();
        let mut seq = IndexedSequence::new();
        assert!(lib
            .extract_barcode(&BioRecord::new("r", INSERT), &mut seq, true)
            .is_err());
    }
}
