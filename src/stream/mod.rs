//! Batched record streams.
//!
//! A [`BatchStream`] is the receiving end of a bounded channel of [`Batch`]es,
//! fed by one or more stage threads. Operators consume a stream and return new
//! ones, spawning the threads of their stage; sinks drain a stream and join
//! every stage behind it, reporting the first error.
//!
//! Channel capacity (`RunConfig::buffer_size` batches) bounds the number of
//! records in flight. The workers of an ordered stage also stay within
//! `buffer_size` batches of the next one to release, however slow that one
//! is. Dropping a stream closes its channel; the stage feeding it stops at
//! its next send, and so on upstream.
//!
//! Linear stages keep batch order unless `RunConfig::no_input_order` is set.
//! Stages that regroup records ([`BatchStream::filter_on`],
//! [`BatchStream::divide_on`], [`BatchStream::distribute`], ...) number their
//! output batches from zero.

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error};

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::config::RunConfig;
use crate::errors::*;
use crate::record::BioRecord;

mod batch;
pub use batch::*;

mod reorder_buffer;
pub use reorder_buffer::*;

mod ops;

mod distribute;
pub use distribute::*;

/// The threads of one pipeline stage.
pub(crate) struct Stage {
    name: &'static str,
    handles: Mutex<Vec<JoinHandle<Result<()>>>>,
    failure: Mutex<Option<String>>,
}

impl Stage {
    pub(crate) fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            handles: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        })
    }

    pub(crate) fn spawn(&self, f: impl FnOnce() -> Result<()> + Send + 'static) {
        let name = self.name;
        let handle = thread::spawn(move || {
            debug!("{name} started");
            let res = f();
            match &res {
                Ok(()) => debug!("{name} finished"),
                Err(e) => error!("{name} failed: {e}"),
            }
            res
        });
        self.handles.lock().unwrap().push(handle);
    }

    /// Wait for every thread of the stage.
    ///
    /// The first caller gets the first error of the threads. A stage shared by
    /// several outputs is joined by each of their sinks: later callers wait
    /// for the first one and get [`Error::StageFailed`] if it failed.
    fn join(&self) -> Result<()> {
        let mut handles = self.handles.lock().unwrap();
        if handles.is_empty() {
            return match &*self.failure.lock().unwrap() {
                Some(reason) => Err(Error::StageFailed {
                    stage: self.name,
                    reason: reason.clone(),
                }),
                None => Ok(()),
            };
        }

        let mut res = Ok(());
        for handle in handles.drain(..) {
            let r = match handle.join() {
                Ok(r) => r,
                Err(_) => Err(Error::WorkerPanicked(self.name)),
            };
            if res.is_ok() {
                res = r;
            }
        }

        if let Err(e) = &res {
            *self.failure.lock().unwrap() = Some(e.to_string());
        }
        res
    }
}

/// Stream of record batches flowing out of a pipeline stage.
pub struct BatchStream {
    rx: Receiver<Batch>,
    paired: bool,
    stages: Vec<Arc<Stage>>,
    config: Arc<RunConfig>,
}

impl BatchStream {
    pub(crate) fn new(
        rx: Receiver<Batch>,
        paired: bool,
        stages: Vec<Arc<Stage>>,
        config: Arc<RunConfig>,
    ) -> Self {
        Self {
            rx,
            paired,
            stages,
            config,
        }
    }

    pub(crate) fn into_parts(self) -> (Receiver<Batch>, bool, Vec<Arc<Stage>>, Arc<RunConfig>) {
        (self.rx, self.paired, self.stages, self.config)
    }

    /// Stream fed by a single source thread.
    ///
    /// `source` sends batches until it is done; a failed send means the stream
    /// was dropped and it should return.
    pub fn from_source(
        name: &'static str,
        paired: bool,
        config: Arc<RunConfig>,
        source: impl FnOnce(Sender<Batch>, &RunConfig) -> Result<()> + Send + 'static,
    ) -> Self {
        let (tx, rx) = bounded(config.buffer_size);
        let stage = Stage::new(name);
        let c = Arc::clone(&config);
        stage.spawn(move || source(tx, &c));
        Self::new(rx, paired, vec![stage], config)
    }

    /// Stream of the given records, cut into batches of `batch_size`.
    pub fn from_records<I>(records: I, config: Arc<RunConfig>) -> Self
    where
        I: IntoIterator<Item = BioRecord>,
        I::IntoIter: Send + 'static,
    {
        let records = records.into_iter();
        Self::from_source("RecordSource", false, config, move |tx, config| {
            let mut batcher = Rebatcher::new(tx, config.batch_size, false);
            for r in records {
                if !batcher.push(r, None)? {
                    return Ok(());
                }
            }
            batcher.flush()?;
            Ok(())
        })
    }

    /// Stream of paired records. Both sides must have the same length.
    pub fn from_pairs<I, J>(records: I, mates: J, config: Arc<RunConfig>) -> Self
    where
        I: IntoIterator<Item = BioRecord>,
        I::IntoIter: Send + 'static,
        J: IntoIterator<Item = BioRecord>,
        J::IntoIter: Send + 'static,
    {
        let mut records = records.into_iter();
        let mut mates = mates.into_iter();
        Self::from_source("PairSource", true, config, move |tx, config| {
            let mut batcher = Rebatcher::new(tx, config.batch_size, true);
            loop {
                match (records.next(), mates.next()) {
                    (Some(r), Some(m)) => {
                        if !batcher.push(r, Some(m))? {
                            return Ok(());
                        }
                    }
                    (None, None) => break,
                    _ => return Err(Error::UnpairedRead("paired record source".to_owned())),
                }
            }
            batcher.flush()?;
            Ok(())
        })
    }

    /// Stream of ready-made batches, renumbered in iteration order.
    pub fn from_batches<I>(batches: I, config: Arc<RunConfig>) -> Self
    where
        I: IntoIterator<Item = Batch>,
        I::IntoIter: Send + 'static,
    {
        let mut batches = batches.into_iter().peekable();
        let paired = batches.peek().is_some_and(|b| b.is_paired());
        Self::from_source("BatchSource", paired, config, move |tx, _| {
            for (i, mut batch) in batches.enumerate() {
                batch.set_order(i as u64);
                if tx.send(batch).is_err() {
                    break;
                }
            }
            Ok(())
        })
    }

    pub fn config(&self) -> &Arc<RunConfig> {
        &self.config
    }

    pub fn is_paired(&self) -> bool {
        self.paired
    }

    /// Next batch, `None` once every upstream stage is done.
    ///
    /// Stages are not joined; finish with [`wait`](Self::wait) to get their
    /// errors.
    pub fn recv(&self) -> Option<Batch> {
        self.rx.recv().ok()
    }

    /// Apply a stream transform.
    pub fn pipe(self, transform: impl FnOnce(BatchStream) -> BatchStream) -> BatchStream {
        transform(self)
    }

    /// Call `f` on every batch, then join all stages.
    ///
    /// An error from `f` closes the stream, which stops upstream stages.
    pub fn for_each_batch(self, mut f: impl FnMut(Batch) -> Result<()>) -> Result<()> {
        let (rx, _, stages, _) = self.into_parts();

        let mut res = Ok(());
        for batch in rx.iter() {
            if let Err(e) = f(batch) {
                res = Err(e);
                break;
            }
        }
        drop(rx);

        let joined = join_all(&stages);
        res.and(joined)
    }

    /// Drain the stream, discarding its records.
    pub fn wait(self) -> Result<()> {
        self.for_each_batch(|_| Ok(()))
    }

    /// All forward records, in stream order.
    pub fn collect(self) -> Result<Vec<BioRecord>> {
        let mut res = Vec::new();
        self.for_each_batch(|batch| {
            res.extend(batch.into_records());
            Ok(())
        })?;
        Ok(res)
    }

    pub fn collect_batches(self) -> Result<Vec<Batch>> {
        let mut res = Vec::new();
        self.for_each_batch(|batch| {
            res.push(batch);
            Ok(())
        })?;
        Ok(res)
    }

    /// All read pairs, in stream order.
    pub fn collect_pairs(self) -> Result<Vec<(BioRecord, BioRecord)>> {
        if !self.paired {
            return Err(Error::InvalidParameter {
                parameter: "stream",
                reason: "collect_pairs needs a paired stream".to_owned(),
            });
        }

        let mut res = Vec::new();
        self.for_each_batch(|mut batch| {
            let mates = batch.unpair().unwrap_or_default();
            res.extend(batch.into_records().into_iter().zip(mates));
            Ok(())
        })?;
        Ok(res)
    }
}

pub(crate) fn join_all(stages: &[Arc<Stage>]) -> Result<()> {
    let mut res = Ok(());
    for stage in stages {
        let r = stage.join();
        if res.is_ok() {
            res = r;
        }
    }
    res
}

/// Stages of several streams, each listed once.
pub(crate) fn merge_stages(lists: impl IntoIterator<Item = Vec<Arc<Stage>>>) -> Vec<Arc<Stage>> {
    let mut res: Vec<Arc<Stage>> = Vec::new();
    for stage in lists.into_iter().flatten() {
        if !res.iter().any(|s| Arc::ptr_eq(s, &stage)) {
            res.push(stage);
        }
    }
    res
}

/// Regroups records into numbered batches of a fixed size.
pub(crate) struct Rebatcher {
    tx: Sender<Batch>,
    size: usize,
    order: u64,
    records: Vec<BioRecord>,
    mates: Option<Vec<BioRecord>>,
}

impl Rebatcher {
    pub(crate) fn new(tx: Sender<Batch>, size: usize, paired: bool) -> Self {
        let size = size.max(1);
        Self {
            tx,
            size,
            order: 0,
            records: Vec::with_capacity(size),
            mates: paired.then(|| Vec::with_capacity(size)),
        }
    }

    /// Add a record. `Ok(false)` once the receiving stream is gone.
    pub(crate) fn push(&mut self, record: BioRecord, mate: Option<BioRecord>) -> Result<bool> {
        self.records.push(record);
        if let (Some(mates), Some(mate)) = (&mut self.mates, mate) {
            mates.push(mate);
        }

        if self.records.len() >= self.size {
            return self.flush();
        }
        Ok(true)
    }

    pub(crate) fn flush(&mut self) -> Result<bool> {
        if self.records.is_empty() {
            return Ok(true);
        }

        let records = std::mem::replace(&mut self.records, Vec::with_capacity(self.size));
        let batch = match &mut self.mates {
            Some(mates) => {
                let mates = std::mem::replace(mates, Vec::with_capacity(self.size));
                Batch::paired(self.order, records, mates)?
            }
            None => Batch::new(self.order, records),
        };
        self.order += 1;

        Ok(self.tx.send(batch).is_ok())
    }
}

/// Records of a batch with their mates, if any.
pub(crate) fn pairs_of(batch: Batch) -> impl Iterator<Item = (BioRecord, Option<BioRecord>)> {
    let (records, mates) = batch.into_parts();
    let mut mates = mates.map(|m| m.into_iter());
    records
        .into_iter()
        .map(move |r| (r, mates.as_mut().and_then(|m| m.next())))
}
