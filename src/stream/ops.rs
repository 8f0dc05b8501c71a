use crossbeam_channel::{bounded, Receiver, Sender};
use log::error;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::config::RunConfig;
use crate::errors::*;
use crate::record::BioRecord;
use crate::stream::*;
use crate::worker::{SeqSliceWorker, SeqWorker, SeqWorkerExt};

impl BatchStream {
    /// Keep the records (and their mates) for which `predicate` holds,
    /// regrouped into batches of `batch_size`.
    pub fn filter_on(
        self,
        predicate: impl Fn(&BioRecord) -> bool + Send + 'static,
        batch_size: usize,
    ) -> BatchStream {
        let (rx, paired, mut stages, config) = self.into_parts();
        let (tx, out) = bounded(config.buffer_size);

        let stage = Stage::new("FilterOn");
        stage.spawn(move || {
            let mut batcher = Rebatcher::new(tx, batch_size, paired);
            for batch in rx.iter() {
                for (r, m) in pairs_of(batch) {
                    if predicate(&r) && !batcher.push(r, m)? {
                        return Ok(());
                    }
                }
            }
            batcher.flush()?;
            Ok(())
        });

        stages.push(stage);
        BatchStream::new(out, paired, stages, config)
    }

    /// Split into the records for which `predicate` holds and the others.
    ///
    /// Both streams are fed by the same thread and must be drained
    /// concurrently.
    pub fn divide_on(
        self,
        predicate: impl Fn(&BioRecord) -> bool + Send + 'static,
        batch_size: usize,
    ) -> (BatchStream, BatchStream) {
        let (rx, paired, mut stages, config) = self.into_parts();
        let (tx_yes, out_yes) = bounded(config.buffer_size);
        let (tx_no, out_no) = bounded(config.buffer_size);

        let stage = Stage::new("DivideOn");
        stage.spawn(move || {
            let mut yes = Some(Rebatcher::new(tx_yes, batch_size, paired));
            let mut no = Some(Rebatcher::new(tx_no, batch_size, paired));

            for batch in rx.iter() {
                for (r, m) in pairs_of(batch) {
                    let side = if predicate(&r) { &mut yes } else { &mut no };
                    let open = match side.as_mut() {
                        Some(batcher) => batcher.push(r, m)?,
                        None => true,
                    };
                    if !open {
                        *side = None;
                    }
                }
                if yes.is_none() && no.is_none() {
                    return Ok(());
                }
            }

            for batcher in [&mut yes, &mut no].into_iter().flatten() {
                batcher.flush()?;
            }
            Ok(())
        });

        stages.push(stage);
        (
            BatchStream::new(out_yes, paired, stages.clone(), Arc::clone(&config)),
            BatchStream::new(out_no, paired, stages, config),
        )
    }

    /// Run a record worker on `n_workers` threads.
    pub fn make_worker(self, worker: impl SeqWorker + 'static, n_workers: usize) -> BatchStream {
        self.make_slice_worker(worker.to_slice(), n_workers)
    }

    /// Run a batch worker on `n_workers` threads.
    ///
    /// Output batches keep their input order unless the run allows
    /// unordered output.
    pub fn make_slice_worker(
        self,
        worker: impl SeqSliceWorker + 'static,
        n_workers: usize,
    ) -> BatchStream {
        let worker = Arc::new(worker);
        let (rx, paired, mut stages, config) = self.into_parts();
        let out_paired = worker.output_paired(paired);
        let (tx, out) = bounded(config.buffer_size);

        let stage = Stage::new(worker.name());
        let n_workers = n_workers.max(1);

        if config.no_input_order {
            for _ in 0..n_workers {
                let (rx, tx, worker) = (rx.clone(), tx.clone(), Arc::clone(&worker));
                stage.spawn(move || {
                    for batch in rx.iter() {
                        let order = batch.order();
                        let mut res = worker.run(batch)?;
                        res.set_order(order);
                        if tx.send(res).is_err() {
                            break;
                        }
                    }
                    Ok(())
                });
            }
        } else {
            let (tx_workers, rx_workers) = bounded(config.buffer_size);
            let window = Arc::new(ReleaseWindow::new(config.buffer_size));
            let input = Arc::new(Mutex::new(NumberedInput { rx, next: 0 }));

            let w = Arc::clone(&window);
            stage.spawn(move || reorder(rx_workers, tx, &w));

            for _ in 0..n_workers {
                let (input, tx, worker) =
                    (Arc::clone(&input), tx_workers.clone(), Arc::clone(&worker));
                let window = Arc::clone(&window);
                stage.spawn(move || run_ordered(&*worker, &input, &window, tx));
            }
        }

        stages.push(stage);
        BatchStream::new(out, out_paired, stages, config)
    }

    /// Pair each record of `self` with the record at the same position in
    /// `other`. Both streams must hold the same number of records.
    pub fn pair_to(self, other: BatchStream) -> BatchStream {
        let (rx_a, paired_a, stages_a, config) = self.into_parts();
        let (rx_b, paired_b, stages_b, _) = other.into_parts();
        let (tx, out) = bounded(config.buffer_size);
        let batch_size = config.batch_size;

        let stage = Stage::new("PairTo");
        stage.spawn(move || {
            if paired_a || paired_b {
                return Err(Error::InvalidParameter {
                    parameter: "pair_to",
                    reason: "cannot pair streams that are already paired".to_owned(),
                });
            }

            let mut batcher = Rebatcher::new(tx, batch_size, true);
            let (mut qa, mut qb) = (VecDeque::new(), VecDeque::new());

            loop {
                if qa.is_empty() {
                    match rx_a.recv() {
                        Ok(batch) => qa.extend(batch.into_records()),
                        Err(_) => break,
                    }
                }
                if qb.is_empty() {
                    match rx_b.recv() {
                        Ok(batch) => qb.extend(batch.into_records()),
                        Err(_) => break,
                    }
                }
                let n = qa.len().min(qb.len());
                for (a, b) in qa.drain(..n).zip(qb.drain(..n)) {
                    if !batcher.push(a, Some(b))? {
                        return Ok(());
                    }
                }
            }

            qa.extend(rx_a.iter().flat_map(Batch::into_records));
            qb.extend(rx_b.iter().flat_map(Batch::into_records));
            if qa.len() != qb.len() {
                error!(
                    "Paired streams differ in length: {} unmatched forward and {} unmatched reverse records",
                    qa.len(),
                    qb.len()
                );
                return Err(Error::UnpairedRead("pair_to".to_owned()));
            }
            for (a, b) in qa.into_iter().zip(qb) {
                if !batcher.push(a, Some(b))? {
                    return Ok(());
                }
            }
            batcher.flush()?;
            Ok(())
        });

        let mut stages = merge_stages([stages_a, stages_b]);
        stages.push(stage);
        BatchStream::new(out, true, stages, config)
    }

    /// Drain the streams one after the other.
    pub fn concat(streams: impl IntoIterator<Item = BatchStream>) -> Result<BatchStream> {
        let (rxs, paired, stages, config) = merge_inputs(streams, "concat")?;
        let (tx, out) = bounded(config.buffer_size);

        let stage = Stage::new("Concat");
        stage.spawn(move || {
            let mut order = 0;
            for rx in rxs {
                for mut batch in rx.iter() {
                    batch.set_order(order);
                    order += 1;
                    if tx.send(batch).is_err() {
                        return Ok(());
                    }
                }
            }
            Ok(())
        });

        let mut stages = stages;
        stages.push(stage);
        Ok(BatchStream::new(out, paired, stages, config))
    }

    /// Merge the streams in whatever order their batches arrive.
    pub fn pool(streams: impl IntoIterator<Item = BatchStream>) -> Result<BatchStream> {
        let (rxs, paired, stages, config) = merge_inputs(streams, "pool")?;
        let (tx, out) = bounded(config.buffer_size);
        let counter = Arc::new(AtomicU64::new(0));

        let stage = Stage::new("Pool");
        for rx in rxs {
            let (tx, counter) = (tx.clone(), Arc::clone(&counter));
            stage.spawn(move || {
                for mut batch in rx.iter() {
                    batch.set_order(counter.fetch_add(1, Ordering::Relaxed));
                    if tx.send(batch).is_err() {
                        break;
                    }
                }
                Ok(())
            });
        }

        let mut stages = stages;
        stages.push(stage);
        Ok(BatchStream::new(out, paired, stages, config))
    }
}

type Inputs = (Vec<Receiver<Batch>>, bool, Vec<Arc<Stage>>, Arc<RunConfig>);

fn merge_inputs(streams: impl IntoIterator<Item = BatchStream>, op: &str) -> Result<Inputs> {
    let mut rxs = Vec::new();
    let mut stage_lists = Vec::new();
    let mut shape: Option<(bool, Arc<RunConfig>)> = None;

    for s in streams {
        let (rx, paired, stages, config) = s.into_parts();
        match &shape {
            Some((p, _)) if *p != paired => {
                return Err(Error::InvalidParameter {
                    parameter: "streams",
                    reason: format!("{op} cannot mix paired and single streams"),
                })
            }
            Some(_) => (),
            None => shape = Some((paired, config)),
        }
        rxs.push(rx);
        stage_lists.push(stages);
    }

    let Some((paired, config)) = shape else {
        return Err(Error::InvalidParameter {
            parameter: "streams",
            reason: format!("{op} needs at least one stream"),
        });
    };
    Ok((rxs, paired, merge_stages(stage_lists), config))
}

/// Input of an ordered worker stage, numbering batches as they are taken.
struct NumberedInput {
    rx: Receiver<Batch>,
    next: u64,
}

impl NumberedInput {
    fn recv(&mut self) -> Option<(u64, Batch)> {
        let batch = self.rx.recv().ok()?;
        let seq = self.next;
        self.next += 1;
        Some((seq, batch))
    }
}

struct WindowState {
    released: u64,
    closed: bool,
}

/// How far ahead of the next batch to release the workers of an ordered
/// stage may run.
struct ReleaseWindow {
    size: u64,
    state: Mutex<WindowState>,
    turn: Condvar,
}

impl ReleaseWindow {
    fn new(size: usize) -> Self {
        Self {
            size: size.max(1) as u64,
            state: Mutex::new(WindowState {
                released: 0,
                closed: false,
            }),
            turn: Condvar::new(),
        }
    }

    /// Block until batch `seq` fits in the window. False once the stage
    /// shuts down.
    fn wait_turn(&self, seq: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        while !state.closed && seq >= state.released + self.size {
            state = self.turn.wait(state).unwrap();
        }
        !state.closed
    }

    fn release(&self, released: u64) {
        self.state.lock().unwrap().released = released;
        self.turn.notify_all();
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.turn.notify_all();
    }
}

/// Closes the window if its thread unwinds.
struct CloseOnPanic<'a>(&'a ReleaseWindow);

impl Drop for CloseOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.close();
        }
    }
}

fn run_ordered<W: SeqSliceWorker + ?Sized>(
    worker: &W,
    input: &Mutex<NumberedInput>,
    window: &ReleaseWindow,
    tx: Sender<(u64, Batch)>,
) -> Result<()> {
    let _guard = CloseOnPanic(window);

    loop {
        let Some((seq, batch)) = input.lock().unwrap().recv() else {
            return Ok(());
        };
        if !window.wait_turn(seq) {
            return Ok(());
        }

        let order = batch.order();
        let mut res = match worker.run(batch) {
            Ok(res) => res,
            Err(e) => {
                window.close();
                return Err(e);
            }
        };
        res.set_order(order);
        if tx.send((seq, res)).is_err() {
            return Ok(());
        }
    }
}

/// Forward batches in the order the workers took them.
fn reorder(rx: Receiver<(u64, Batch)>, tx: Sender<Batch>, window: &ReleaseWindow) -> Result<()> {
    let _guard = CloseOnPanic(window);
    let mut buffer = ReorderBuffer::new();
    let mut released = 0;

    for (seq, batch) in rx.iter() {
        buffer.insert(seq, batch);
        for batch in buffer.drain_ready() {
            if tx.send(batch).is_err() {
                window.close();
                return Ok(());
            }
            released += 1;
            window.release(released);
        }
    }

    for batch in buffer.drain_all() {
        if tx.send(batch).is_err() {
            break;
        }
    }
    Ok(())
}
