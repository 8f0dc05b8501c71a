use thread_local::*;

use std::cell::RefCell;
use std::sync::Arc;

use crate::apat::IndexedSequence;
use crate::errors::*;
use crate::ngs::NgsLibrary;
use crate::record::BioRecord;
use crate::stream::Batch;
use crate::worker::*;

/// What a demultiplexing worker does with its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemuxOptions {
    /// Reverse complement amplicons found in reverse direction.
    pub reorient: bool,
    /// Drop the reads that could not be assigned instead of passing them on
    /// with a `demultiplex_error`.
    pub discard_unassigned: bool,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        Self {
            reorient: true,
            discard_unassigned: false,
        }
    }
}

impl DemuxOptions {
    fn keep(&self, record: &BioRecord) -> bool {
        !(self.discard_unassigned && record.has_annotation("demultiplex_error"))
    }
}

pub struct DemultiplexOp {
    library: Arc<NgsLibrary>,
    options: DemuxOptions,
    seq: ThreadLocal<RefCell<IndexedSequence>>,
}

impl DemultiplexOp {
    const NAME: &'static str = "DemultiplexOp";

    /// Cut each read down to its amplicon and annotate it with its sample.
    ///
    /// The library must already be compiled.
    pub fn new(library: Arc<NgsLibrary>, options: DemuxOptions) -> Result<Self> {
        library.ensure_compiled()?;
        Ok(Self {
            library,
            options,
            seq: ThreadLocal::new(),
        })
    }
}

impl SeqWorker for DemultiplexOp {
    fn run(&self, record: BioRecord) -> Result<Option<BioRecord>> {
        let mut seq = self
            .seq
            .get_or(|| RefCell::new(IndexedSequence::new()))
            .borrow_mut();

        let out = self
            .library
            .extract_barcode(&record, &mut seq, self.options.reorient)?;
        Ok(self.options.keep(&out).then_some(out))
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

pub struct MultiDemultiplexOp {
    library: Arc<NgsLibrary>,
    options: DemuxOptions,
    seq: ThreadLocal<RefCell<IndexedSequence>>,
}

impl MultiDemultiplexOp {
    const NAME: &'static str = "MultiDemultiplexOp";

    /// Extract every amplicon of each read (concatenated or chimeric reads
    /// give several records).
    pub fn new(library: Arc<NgsLibrary>, options: DemuxOptions) -> Result<Self> {
        library.ensure_compiled()?;
        Ok(Self {
            library,
            options,
            seq: ThreadLocal::new(),
        })
    }
}

impl SeqSliceWorker for MultiDemultiplexOp {
    fn run(&self, batch: Batch) -> Result<Batch> {
        if batch.is_paired() {
            return Err(Error::InvalidParameter {
                parameter: Self::NAME,
                reason: "paired batches must be assembled first".to_owned(),
            });
        }

        let mut seq = self
            .seq
            .get_or(|| RefCell::new(IndexedSequence::new()))
            .borrow_mut();

        let order = batch.order();
        let mut res = Vec::with_capacity(batch.len());
        for record in batch.into_records() {
            let amplicons = self
                .library
                .extract_multi(&record, &mut seq, self.options.reorient)?;
            res.extend(amplicons.into_iter().filter(|r| self.options.keep(r)));
        }

        Ok(Batch::new(order, res))
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ngs::{Pcr, PrimerPair, TagPair};

    const FWD: &str = "ttagataccccactatgc";
    const REV: &str = "tagaacaggctcctctag";

    fn library() -> Arc<NgsLibrary> {
        let mut lib = NgsLibrary::new();
        lib.add_pcr(
            PrimerPair::new(FWD, REV),
            TagPair::new("acagcaca", "gtcgtaga"),
            Pcr::new("e", "s1"),
        )
        .unwrap();
        lib.compile().unwrap();
        Arc::new(lib)
    }

    fn amplicon(insert: &str) -> BioRecord {
        let mut a = format!("acagcaca{FWD}{insert}").into_bytes();
        a.extend(crate::iupac::reverse_complement(REV.as_bytes()));
        a.extend(crate::iupac::reverse_complement(b"gtcgtaga"));
        BioRecord::new("r", a)
    }

    #[test]
    fn test_demultiplex_op() {
        let op = DemultiplexOp::new(library(), DemuxOptions::default()).unwrap();
        let out = op.run(amplicon("ccccggggaaaatttt")).unwrap().unwrap();
        assert_eq!(out.sequence(), b"ccccggggaaaatttt");
        assert_eq!(out.annotations().get_str("sample"), Some("s1"));

        let out = op.run(BioRecord::new("x", b"acgtacgtacgt")).unwrap().unwrap();
        assert!(out.has_annotation("demultiplex_error"));
    }

    #[test]
    fn test_discard_unassigned() {
        let options = DemuxOptions {
            discard_unassigned: true,
            ..Default::default()
        };
        let op = DemultiplexOp::new(library(), options).unwrap();
        assert!(op.run(BioRecord::new("x", b"acgtacgtacgt")).unwrap().is_none());
        assert!(op.run(amplicon("ccccggggaaaatttt")).unwrap().is_some());
    }

    #[test]
    fn test_uncompiled_library_rejected() {
        let mut lib = NgsLibrary::new();
        lib.add_pcr(
            PrimerPair::new(FWD, REV),
            TagPair::new("acagcaca", "gtcgtaga"),
            Pcr::new("e", "s1"),
        )
        .unwrap();
        assert!(DemultiplexOp::new(Arc::new(lib), DemuxOptions::default()).is_err());
    }

    #[test]
    fn test_multi_demultiplex_op() {
        let op = MultiDemultiplexOp::new(library(), DemuxOptions::default()).unwrap();
        let batch = Batch::new(
            3,
            vec![amplicon("ccccggggaaaatttt"), BioRecord::new("x", b"acgtacgtacgt")],
        );
        let out = op.run(batch).unwrap();
        assert_eq!(out.order(), 3);
        assert_eq!(out.len(), 2);
        assert_eq!(out.records()[0].id(), "r_1");
        assert!(out.records()[1].has_annotation("demultiplex_error"));

        let paired = Batch::paired(0, vec![amplicon("aaaa")], vec![amplicon("aaaa")]).unwrap();
        assert!(op.run(paired).is_err());
    }
}
