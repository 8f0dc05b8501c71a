use log::info;
use rustc_hash::{FxHashMap, FxHashSet};

use std::fmt;

use crate::apat::ApatPattern;
use crate::errors::*;
use crate::record::{Annotations, Side};

/// Forward and reverse primer of a marker, lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimerPair {
    pub forward: String,
    pub reverse: String,
}

impl PrimerPair {
    pub fn new(forward: impl AsRef<str>, reverse: impl AsRef<str>) -> Self {
        Self {
            forward: forward.as_ref().trim().to_ascii_lowercase(),
            reverse: reverse.as_ref().trim().to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for PrimerPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.forward, self.reverse)
    }
}

/// Sample tags read next to each primer, lowercase. An empty tag means the
/// side carries no tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TagPair {
    pub forward: Vec<u8>,
    pub reverse: Vec<u8>,
}

impl TagPair {
    pub fn new(forward: impl AsRef<[u8]>, reverse: impl AsRef<[u8]>) -> Self {
        Self {
            forward: forward.as_ref().to_ascii_lowercase(),
            reverse: reverse.as_ref().to_ascii_lowercase(),
        }
    }

    pub fn side(&self, side: Side) -> &[u8] {
        match side {
            Side::Forward => &self.forward,
            Side::Reverse => &self.reverse,
        }
    }
}

impl fmt::Display for TagPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |t: &[u8]| {
            if t.is_empty() {
                "-".to_owned()
            } else {
                utf8(t)
            }
        };
        write!(f, "{}:{}", show(&self.forward), show(&self.reverse))
    }
}

/// One PCR: the sample a tag pair stands for.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pcr {
    pub experiment: String,
    pub sample: String,
    /// May be assigned from one primer and its tag alone.
    pub partial: bool,
    /// Merged into every record assigned to this PCR.
    pub annotations: Annotations,
}

impl Pcr {
    pub fn new(experiment: impl Into<String>, sample: impl Into<String>) -> Self {
        Self {
            experiment: experiment.into(),
            sample: sample.into(),
            ..Default::default()
        }
    }
}

/// Matching tolerances for one primer and its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideOptions {
    pub max_errors: usize,
    pub allows_indels: bool,
    /// Bases between the tag and the primer.
    pub spacer: usize,
    /// Base flanking the tag on the outer side, 0 for none.
    pub tag_delimiter: u8,
    /// How far the tag may be shifted from its expected position.
    pub tag_indels: usize,
}

impl Default for SideOptions {
    fn default() -> Self {
        Self {
            max_errors: 2,
            allows_indels: false,
            spacer: 0,
            tag_delimiter: 0,
            tag_indels: 0,
        }
    }
}

impl SideOptions {
    pub(crate) fn delimiter_len(&self) -> usize {
        (self.tag_delimiter != 0) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarkerOptions {
    pub forward: SideOptions,
    pub reverse: SideOptions,
}

impl MarkerOptions {
    pub fn side(&self, side: Side) -> &SideOptions {
        match side {
            Side::Forward => &self.forward,
            Side::Reverse => &self.reverse,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideOptions {
        match side {
            Side::Forward => &mut self.forward,
            Side::Reverse => &mut self.reverse,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledPrimers {
    pub forward: ApatPattern,
    pub reverse: ApatPattern,
    pub forward_rc: ApatPattern,
    pub reverse_rc: ApatPattern,
}

/// A primer pair with its sample table.
#[derive(Debug, Clone)]
pub struct Marker {
    primers: PrimerPair,
    options: MarkerOptions,
    samples: FxHashMap<TagPair, Pcr>,
    pub(crate) compiled: Option<CompiledPrimers>,
    pub(crate) forward_tag_len: usize,
    pub(crate) reverse_tag_len: usize,
    pub(crate) forward_tags: FxHashSet<Vec<u8>>,
    pub(crate) reverse_tags: FxHashSet<Vec<u8>>,
}

impl Marker {
    fn new(primers: PrimerPair, options: MarkerOptions) -> Self {
        Self {
            primers,
            options,
            samples: FxHashMap::default(),
            compiled: None,
            forward_tag_len: 0,
            reverse_tag_len: 0,
            forward_tags: FxHashSet::default(),
            reverse_tags: FxHashSet::default(),
        }
    }

    pub fn primers(&self) -> &PrimerPair {
        &self.primers
    }

    pub fn options(&self) -> &MarkerOptions {
        &self.options
    }

    /// Changing the options drops the compiled patterns.
    pub fn options_mut(&mut self) -> &mut MarkerOptions {
        self.compiled = None;
        &mut self.options
    }

    pub fn samples(&self) -> &FxHashMap<TagPair, Pcr> {
        &self.samples
    }

    pub fn tag_len(&self, side: Side) -> usize {
        match side {
            Side::Forward => self.forward_tag_len,
            Side::Reverse => self.reverse_tag_len,
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    pub(crate) fn known_tags(&self, side: Side) -> &FxHashSet<Vec<u8>> {
        match side {
            Side::Forward => &self.forward_tags,
            Side::Reverse => &self.reverse_tags,
        }
    }

    pub fn add_pcr(&mut self, tags: TagPair, pcr: Pcr) -> Result<()> {
        if let Some(prev) = self.samples.get(&tags) {
            return Err(Error::TagConfig {
                context: format!("marker {}", self.primers),
                reason: format!(
                    "tag pair {} is used by both sample \"{}\" and sample \"{}\"",
                    tags, prev.sample, pcr.sample
                ),
            });
        }

        self.compiled = None;
        self.samples.insert(tags, pcr);
        Ok(())
    }

    /// The only partial PCR whose tag on `side` is `tag`.
    pub(crate) fn partial_pcr(&self, side: Side, tag: &[u8]) -> Option<(&TagPair, &Pcr)> {
        let mut found = self
            .samples
            .iter()
            .filter(|(t, pcr)| pcr.partial && t.side(side) == tag);
        let first = found.next()?;
        found.next().is_none().then_some(first)
    }

    fn compile(&mut self) -> Result<()> {
        let context = || format!("marker {}", self.primers);

        for side in [Side::Forward, Side::Reverse] {
            let opts = self.options.side_mut(side);
            let d = opts.tag_delimiter;
            opts.tag_delimiter = normalize_delimiter(d).ok_or_else(|| Error::TagConfig {
                context: context(),
                reason: format!(
                    "invalid {side:?} tag delimiter '{}', expected one of a, c, g, t or 0",
                    d as char
                ),
            })?;
        }

        let mut lens = [None, None];
        for tags in self.samples.keys() {
            for (i, side) in [Side::Forward, Side::Reverse].into_iter().enumerate() {
                let len = tags.side(side).len();
                match lens[i] {
                    None => lens[i] = Some(len),
                    Some(l) if l != len => {
                        return Err(Error::TagConfig {
                            context: context(),
                            reason: format!(
                                "{side:?} tags have different lengths ({l} and {len})"
                            ),
                        })
                    }
                    _ => (),
                }
            }
        }

        let compile = |primer: &str, opts: &SideOptions| {
            ApatPattern::compile(primer, opts.max_errors, opts.allows_indels).map_err(|source| {
                Error::PatternCompile {
                    pattern: primer.to_owned(),
                    source,
                }
            })
        };
        let forward = compile(&self.primers.forward, &self.options.forward)?;
        let reverse = compile(&self.primers.reverse, &self.options.reverse)?;

        self.forward_tag_len = lens[0].unwrap_or(0);
        self.reverse_tag_len = lens[1].unwrap_or(0);
        self.forward_tags = self.samples.keys().map(|t| t.forward.clone()).collect();
        self.reverse_tags = self.samples.keys().map(|t| t.reverse.clone()).collect();
        self.compiled = Some(CompiledPrimers {
            forward_rc: forward.reverse_complement(),
            reverse_rc: reverse.reverse_complement(),
            forward,
            reverse,
        });

        Ok(())
    }
}

fn normalize_delimiter(d: u8) -> Option<u8> {
    match d.to_ascii_lowercase() {
        0 | b'0' => Some(0),
        b @ (b'a' | b'c' | b'g' | b't') => Some(b),
        _ => None,
    }
}

/// A set of markers, each with its samples.
///
/// Markers are kept and tried in insertion order, so matching is
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct NgsLibrary {
    markers: Vec<Marker>,
    index: FxHashMap<PrimerPair, usize>,
    defaults: MarkerOptions,
}

impl NgsLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options given to markers created from now on.
    pub fn defaults_mut(&mut self) -> &mut MarkerOptions {
        &mut self.defaults
    }

    pub fn defaults(&self) -> &MarkerOptions {
        &self.defaults
    }

    /// The marker for a primer pair, created if needed.
    pub fn marker_mut(&mut self, primers: PrimerPair) -> &mut Marker {
        let idx = match self.index.get(&primers) {
            Some(&i) => i,
            None => {
                let i = self.markers.len();
                self.index.insert(primers.clone(), i);
                self.markers.push(Marker::new(primers, self.defaults.clone()));
                i
            }
        };
        &mut self.markers[idx]
    }

    pub fn marker(&self, primers: &PrimerPair) -> Option<&Marker> {
        self.index.get(primers).map(|&i| &self.markers[i])
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn add_pcr(&mut self, primers: PrimerPair, tags: TagPair, pcr: Pcr) -> Result<()> {
        self.marker_mut(primers).add_pcr(tags, pcr)
    }

    pub fn is_compiled(&self) -> bool {
        !self.markers.is_empty() && self.markers.iter().all(|m| m.is_compiled())
    }

    /// Compile every marker's primers and check its tag table.
    pub fn compile(&mut self) -> Result<()> {
        for marker in &mut self.markers {
            marker.compile()?;
        }

        info!(
            "Compiled {} marker(s) with {} PCR(s)",
            self.markers.len(),
            self.markers.iter().map(|m| m.samples.len()).sum::<usize>()
        );
        Ok(())
    }

    pub(crate) fn ensure_compiled(&self) -> Result<()> {
        if self.is_compiled() {
            Ok(())
        } else {
            Err(Error::InvalidParameter {
                parameter: "library",
                reason: "the NGS library must be compiled before matching".to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primers() -> PrimerPair {
        PrimerPair::new("GGGCAATCCTGAGCCAA", "CCATTGAGTCTCTGCACCTATC")
    }

    #[test]
    fn test_markers_keep_insertion_order() {
        let mut lib = NgsLibrary::new();
        lib.marker_mut(PrimerPair::new("acgtacgt", "ttggccaa"));
        lib.marker_mut(PrimerPair::new("aaaccc", "gggttt"));
        lib.marker_mut(PrimerPair::new("acgtacgt", "ttggccaa"));

        assert_eq!(lib.len(), 2);
        assert_eq!(lib.markers()[0].primers().forward, "acgtacgt");
        assert_eq!(lib.markers()[1].primers().forward, "aaaccc");
    }

    #[test]
    fn test_duplicate_tag_pair() {
        let mut lib = NgsLibrary::new();
        lib.add_pcr(primers(), TagPair::new("acgt", "tgca"), Pcr::new("exp", "s1"))
            .unwrap();
        let err = lib
            .add_pcr(primers(), TagPair::new("ACGT", "TGCA"), Pcr::new("exp", "s2"))
            .unwrap_err();
        assert!(matches!(err, Error::TagConfig { .. }));
    }

    #[test]
    fn test_uneven_tag_lengths() {
        let mut lib = NgsLibrary::new();
        lib.add_pcr(primers(), TagPair::new("acgt", "tgca"), Pcr::new("exp", "s1"))
            .unwrap();
        lib.add_pcr(primers(), TagPair::new("acgta", "tgcc"), Pcr::new("exp", "s2"))
            .unwrap();
        assert!(matches!(lib.compile().unwrap_err(), Error::TagConfig { .. }));
    }

    #[test]
    fn test_delimiter_normalization() {
        let mut lib = NgsLibrary::new();
        lib.add_pcr(primers(), TagPair::new("acgt", "tgca"), Pcr::new("exp", "s1"))
            .unwrap();

        lib.marker_mut(primers()).options_mut().forward.tag_delimiter = b'C';
        lib.compile().unwrap();
        assert_eq!(lib.markers()[0].options().forward.tag_delimiter, b'c');
        assert_eq!(lib.markers()[0].tag_len(Side::Forward), 4);

        lib.marker_mut(primers()).options_mut().reverse.tag_delimiter = b'n';
        assert!(matches!(lib.compile().unwrap_err(), Error::TagConfig { .. }));
        assert!(!lib.is_compiled());
    }

    #[test]
    fn test_bad_primer() {
        let mut lib = NgsLibrary::new();
        lib.add_pcr(
            PrimerPair::new("acgtxx", "acgtacgt"),
            TagPair::default(),
            Pcr::new("exp", "s1"),
        )
        .unwrap();
        assert!(matches!(lib.compile().unwrap_err(), Error::PatternCompile { .. }));
    }

    #[test]
    fn test_partial_lookup() {
        let mut marker = Marker::new(primers(), MarkerOptions::default());
        let mut pcr = Pcr::new("exp", "s1");
        pcr.partial = true;
        marker.add_pcr(TagPair::new("acgt", "tgca"), pcr).unwrap();
        marker
            .add_pcr(TagPair::new("ttta", "tgca"), Pcr::new("exp", "s2"))
            .unwrap();

        let (_, pcr) = marker.partial_pcr(Side::Forward, b"acgt").unwrap();
        assert_eq!(pcr.sample, "s1");
        assert!(marker.partial_pcr(Side::Forward, b"ttta").is_none());
        assert_eq!(
            marker.partial_pcr(Side::Reverse, b"tgca").map(|p| p.1.sample.as_str()),
            Some("s1")
        );
    }
}
