use thread_local::*;

use std::cell::RefCell;

use crate::errors::*;
use crate::pe_align::{PeAlignParams, PeAligner};
use crate::stream::Batch;
use crate::worker::*;

pub struct PairedEndAlignOp {
    params: PeAlignParams,
    aligner: ThreadLocal<RefCell<PeAligner>>,
}

impl PairedEndAlignOp {
    const NAME: &'static str = "PairedEndAlignOp";

    /// Assemble each read pair into a single record.
    ///
    /// Takes paired batches and emits unpaired ones.
    pub fn new(params: PeAlignParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            aligner: ThreadLocal::new(),
        })
    }
}

impl SeqSliceWorker for PairedEndAlignOp {
    fn run(&self, batch: Batch) -> Result<Batch> {
        let order = batch.order();
        let (records, Some(mates)) = batch.into_parts() else {
            return Err(Error::UnpairedRead(Self::NAME.to_owned()));
        };

        let mut aligner = self
            .aligner
            .get_or(|| RefCell::new(PeAligner::new(self.params.clone())))
            .borrow_mut();

        let res = records
            .iter()
            .zip(&mates)
            .map(|(a, b)| aligner.assemble(a, b))
            .collect::<Result<Vec<_>>>()?;

        Ok(Batch::new(order, res))
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn output_paired(&self, _input_paired: bool) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BioRecord;

    fn read(id: &str, seq: &[u8]) -> BioRecord {
        BioRecord::new(id, seq).with_qualities(vec![40; seq.len()]).unwrap()
    }

    #[test]
    fn test_assembles_pairs() {
        let op = PairedEndAlignOp::new(PeAlignParams {
            min_overlap: 4,
            ..Default::default()
        })
        .unwrap();

        let batch = Batch::paired(
            7,
            vec![read("p1", b"ACGTACGTAA"), read("p2", b"ACGTACGTAA")],
            vec![read("p1", b"TTACGTACGT"), read("p2", b"TTACGTACGT")],
        )
        .unwrap();

        let out = op.run(batch).unwrap();
        assert!(!out.is_paired());
        assert!(!op.output_paired(true));
        assert_eq!(out.order(), 7);
        assert_eq!(out.len(), 2);
        assert_eq!(out.records()[1].id(), "p2");
        assert_eq!(out.records()[0].sequence(), b"acgtacgtaa");
    }

    #[test]
    fn test_unpaired_batch_rejected() {
        let op = PairedEndAlignOp::new(PeAlignParams::default()).unwrap();
        let batch = Batch::new(0, vec![read("a", b"ACGT")]);
        assert!(matches!(op.run(batch), Err(Error::UnpairedRead(_))));
    }
}
