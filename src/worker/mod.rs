//! Record and batch workers.
//!
//! A [`SeqWorker`] turns one record into zero or one record; a
//! [`SeqSliceWorker`] turns a whole batch into a new batch. Workers are shared
//! by every thread of a stage, so any scratch space they need is kept per
//! thread.
//!
//! Record workers compose with [`SeqWorkerExt`]: `a.chain(b)` runs `b` on the
//! output of `a`, `a.when(p)` only runs `a` on records matching `p`, and
//! `a.to_slice()` lifts a record worker to a batch worker.

use crate::errors::*;
use crate::record::BioRecord;
use crate::stream::Batch;

pub mod ops;
pub use ops::*;

pub trait SeqWorker: Send + Sync {
    /// Process one record. `Ok(None)` drops it.
    fn run(&self, record: BioRecord) -> Result<Option<BioRecord>>;

    fn name(&self) -> &'static str;
}

pub trait SeqSliceWorker: Send + Sync {
    fn run(&self, batch: Batch) -> Result<Batch>;

    fn name(&self) -> &'static str;

    /// Whether the output batches are paired, given the input.
    fn output_paired(&self, input_paired: bool) -> bool {
        input_paired
    }
}

impl<W: SeqWorker + ?Sized> SeqWorker for Box<W> {
    fn run(&self, record: BioRecord) -> Result<Option<BioRecord>> {
        (**self).run(record)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<W: SeqSliceWorker + ?Sized> SeqSliceWorker for Box<W> {
    fn run(&self, batch: Batch) -> Result<Batch> {
        (**self).run(batch)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn output_paired(&self, input_paired: bool) -> bool {
        (**self).output_paired(input_paired)
    }
}

pub trait SeqWorkerExt: SeqWorker + Sized {
    /// Run `next` on every record this worker keeps.
    fn chain<W: SeqWorker>(self, next: W) -> Chain<Self, W> {
        Chain {
            first: self,
            second: next,
        }
    }

    /// Only run this worker on records matching `predicate`; other records
    /// pass through unchanged.
    fn when<F>(self, predicate: F) -> ConditionalWorker<Self, F>
    where
        F: Fn(&BioRecord) -> bool + Send + Sync,
    {
        ConditionalWorker {
            worker: self,
            predicate,
            drop_others: false,
        }
    }

    /// Like [`when`](Self::when), dropping the records that do not match.
    fn only_when<F>(self, predicate: F) -> ConditionalWorker<Self, F>
    where
        F: Fn(&BioRecord) -> bool + Send + Sync,
    {
        ConditionalWorker {
            worker: self,
            predicate,
            drop_others: true,
        }
    }

    fn to_slice(self) -> RecordSliceWorker<Self> {
        RecordSliceWorker { worker: self }
    }
}

impl<W: SeqWorker> SeqWorkerExt for W {}

/// Two record workers applied one after the other.
pub struct Chain<A, B> {
    first: A,
    second: B,
}

/// Chain two record workers.
pub fn chain<A: SeqWorker, B: SeqWorker>(first: A, second: B) -> Chain<A, B> {
    first.chain(second)
}

impl<A: SeqWorker, B: SeqWorker> SeqWorker for Chain<A, B> {
    fn run(&self, record: BioRecord) -> Result<Option<BioRecord>> {
        match self.first.run(record)? {
            Some(record) => self.second.run(record),
            None => Ok(None),
        }
    }

    fn name(&self) -> &'static str {
        "Chain"
    }
}

/// A record worker gated by a predicate.
pub struct ConditionalWorker<W, F> {
    worker: W,
    predicate: F,
    drop_others: bool,
}

impl<W, F> SeqWorker for ConditionalWorker<W, F>
where
    W: SeqWorker,
    F: Fn(&BioRecord) -> bool + Send + Sync,
{
    fn run(&self, record: BioRecord) -> Result<Option<BioRecord>> {
        if (self.predicate)(&record) {
            self.worker.run(record)
        } else if self.drop_others {
            Ok(None)
        } else {
            Ok(Some(record))
        }
    }

    fn name(&self) -> &'static str {
        self.worker.name()
    }
}

/// A record worker applied to each record of a batch.
///
/// In a paired batch the worker runs on both reads of a pair and the pair is
/// dropped if either read is.
pub struct RecordSliceWorker<W> {
    worker: W,
}

impl<W: SeqWorker> SeqSliceWorker for RecordSliceWorker<W> {
    fn run(&self, batch: Batch) -> Result<Batch> {
        let order = batch.order();
        let (records, mates) = batch.into_parts();

        match mates {
            None => {
                let mut res = Vec::with_capacity(records.len());
                for r in records {
                    res.extend(self.worker.run(r)?);
                }
                Ok(Batch::new(order, res))
            }
            Some(mates) => {
                let mut res = Vec::with_capacity(records.len());
                let mut res_mates = Vec::with_capacity(mates.len());
                for (r, m) in records.into_iter().zip(mates) {
                    if let (Some(r), Some(m)) = (self.worker.run(r)?, self.worker.run(m)?) {
                        res.push(r);
                        res_mates.push(m);
                    }
                }
                Batch::paired(order, res, res_mates)
            }
        }
    }

    fn name(&self) -> &'static str {
        self.worker.name()
    }
}
