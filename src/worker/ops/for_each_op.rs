use crate::errors::*;
use crate::record::BioRecord;
use crate::worker::*;

pub struct ForEachOp<F: Fn(&mut BioRecord) + Send + Sync> {
    func: F,
}

impl<F: Fn(&mut BioRecord) + Send + Sync> ForEachOp<F> {
    const NAME: &'static str = "ForEachOp";

    /// Apply an arbitrary function on each record.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F: Fn(&mut BioRecord) + Send + Sync> SeqWorker for ForEachOp<F> {
    fn run(&self, mut record: BioRecord) -> Result<Option<BioRecord>> {
        (self.func)(&mut record);
        Ok(Some(record))
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

pub struct DbgOp;

impl DbgOp {
    /// Print each record to standard error.
    pub fn new() -> ForEachOp<impl Fn(&mut BioRecord) + Send + Sync> {
        ForEachOp::new(|record: &mut BioRecord| eprintln!("{record}"))
    }
}
