use thread_local::*;

use std::cell::RefCell;
use std::sync::Arc;

use crate::apat::IndexedSequence;
use crate::errors::*;
use crate::patterns::Patterns;
use crate::split::split_sequence;
use crate::stream::Batch;
use crate::worker::*;

pub struct SplitOp {
    patterns: Arc<Patterns>,
    seq: ThreadLocal<RefCell<IndexedSequence>>,
}

impl SplitOp {
    const NAME: &'static str = "SplitOp";

    /// Cut each read into the fragments delimited by the split patterns.
    pub fn new(patterns: Arc<Patterns>) -> Self {
        Self {
            patterns,
            seq: ThreadLocal::new(),
        }
    }
}

impl SeqSliceWorker for SplitOp {
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
            res.extend(split_sequence(&record, &self.patterns, &mut seq)?);
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
    use crate::patterns::read_split_config_from_reader;
    use crate::record::BioRecord;
    use crate::split::SplitOptions;

    #[test]
    fn test_split_op() {
        let patterns = read_split_config_from_reader(
            "T-tag,pcr_pool\nccgtacga,poolA\n".as_bytes(),
            "split.csv",
            &SplitOptions::default(),
        )
        .unwrap();
        let op = SplitOp::new(Arc::new(patterns));

        let mut s = [b't'; 20].to_vec();
        s.extend(b"ccgtacga");
        s.extend([b'g'; 20]);
        let batch = Batch::new(2, vec![BioRecord::new("r", &s), BioRecord::new("n", [b'a'; 12])]);

        let out = op.run(batch).unwrap();
        assert_eq!(out.order(), 2);
        assert_eq!(out.len(), 3);
        assert_eq!(out.records()[0].sequence(), &[b't'; 20][..]);
        assert_eq!(out.records()[1].sequence(), &[b'g'; 20][..]);
        assert_eq!(out.records()[2].annotations().get_int("obisplit_nfrg"), Some(1));
    }
}
