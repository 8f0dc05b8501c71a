use crate::errors::*;
use crate::record::BioRecord;
use crate::worker::*;

pub struct RetainOp<F: Fn(&BioRecord) -> bool + Send + Sync> {
    predicate: F,
}

impl<F: Fn(&BioRecord) -> bool + Send + Sync> RetainOp<F> {
    const NAME: &'static str = "RetainOp";

    /// Retain only the records for which the predicate holds and drop the rest.
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F: Fn(&BioRecord) -> bool + Send + Sync> SeqWorker for RetainOp<F> {
    fn run(&self, record: BioRecord) -> Result<Option<BioRecord>> {
        Ok((self.predicate)(&record).then_some(record))
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

pub struct DropFailedOp;

impl DropFailedOp {
    /// Drop the records that carry a `demultiplex_error`.
    pub fn new() -> RetainOp<impl Fn(&BioRecord) -> bool + Send + Sync> {
        RetainOp::new(|record: &BioRecord| !record.has_annotation("demultiplex_error"))
    }
}
