use ampliplex::ngs::*;
use ampliplex::stream::{Batch, BatchStream};
use ampliplex::worker::*;
use ampliplex::*;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn random_records(n: usize, seed: u64) -> Vec<BioRecord> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let len = rng.gen_range(20..60);
            let seq: Vec<u8> = (0..len).map(|_| b"acgt"[rng.gen_range(0..4)]).collect();
            BioRecord::new(format!("r{i}"), seq)
        })
        .collect()
}

fn index(record: &BioRecord) -> usize {
    record.id()[1..].parse().unwrap()
}

#[test]
fn linear_chain_keeps_order() {
    let config = Arc::new(RunConfig::default().with_batch_size(7).with_buffer_size(3));
    let jitter = ForEachOp::new(|r: &mut BioRecord| {
        // uneven work so that workers finish out of order
        thread::sleep(Duration::from_micros((r.len() as u64 % 5) * 50));
        r.set_count(2);
    });

    let out = BatchStream::from_records(random_records(500, 1), config)
        .pipe(|s| s.make_worker(jitter, 4))
        .filter_on(|r| index(r) % 3 != 0, 11)
        .collect()
        .unwrap();

    let ids: Vec<usize> = out.iter().map(index).collect();
    let expected: Vec<usize> = (0..500).filter(|i| i % 3 != 0).collect();
    assert_eq!(ids, expected);
    assert!(out.iter().all(|r| r.count() == 2));
}

#[test]
fn unordered_run_keeps_every_record() {
    let config = Arc::new(
        RunConfig::default()
            .with_batch_size(5)
            .with_no_input_order(true),
    );
    let out = BatchStream::from_records(random_records(200, 2), config)
        .make_worker(RetainOp::new(|r: &BioRecord| r.len() >= 30), 4)
        .collect()
        .unwrap();

    let mut ids: Vec<usize> = out.iter().map(index).collect();
    ids.sort_unstable();
    let expected: Vec<usize> = random_records(200, 2)
        .iter()
        .filter(|r| r.len() >= 30)
        .map(index)
        .collect();
    assert_eq!(ids, expected);
}

const BATCH_SIZE: usize = 10;
const BUFFER_SIZE: usize = 2;

/// Most records produced but not yet consumed while a slow sink drains a
/// worker stage. The worker sleeps on `slow_id`.
fn max_in_flight(batches: u64, n_workers: usize, slow_id: &'static str) -> usize {
    let config = Arc::new(
        RunConfig::default()
            .with_batch_size(BATCH_SIZE)
            .with_buffer_size(BUFFER_SIZE),
    );
    let produced = Arc::new(AtomicUsize::new(0));
    let p = Arc::clone(&produced);

    let stream = BatchStream::from_source("Counting", false, config, move |tx, config| {
        for order in 0..batches {
            let records = (0..config.batch_size)
                .map(|i| BioRecord::new(format!("b{order}_{i}"), b"acgt"))
                .collect();
            p.fetch_add(config.batch_size, Ordering::SeqCst);
            if tx.send(Batch::new(order, records)).is_err() {
                break;
            }
        }
        Ok(())
    })
    .make_worker(
        ForEachOp::new(move |r: &mut BioRecord| {
            if r.id() == slow_id {
                thread::sleep(Duration::from_millis(300));
            }
        }),
        n_workers,
    );

    let mut consumed = 0;
    let mut max_in_flight = 0;
    stream
        .for_each_batch(|batch| {
            consumed += batch.len();
            max_in_flight = max_in_flight.max(produced.load(Ordering::SeqCst) - consumed);
            thread::sleep(Duration::from_millis(2));
            Ok(())
        })
        .unwrap();

    assert_eq!(consumed, batches as usize * BATCH_SIZE);
    max_in_flight
}

// three channels, the batch the source is sending and one batch per worker
fn in_flight_bound(n_workers: usize) -> usize {
    (3 * BUFFER_SIZE + n_workers + 2) * BATCH_SIZE
}

#[test]
fn fast_source_slow_sink_stays_bounded() {
    let n = max_in_flight(60, 1, "");
    assert!(n <= in_flight_bound(1), "{n} records in flight");
}

#[test]
fn slow_batch_holds_back_other_workers() {
    let n = max_in_flight(200, 2, "b0_0");
    assert!(n <= in_flight_bound(2), "{n} records in flight");

    let n = max_in_flight(100, 4, "b3_5");
    assert!(n <= in_flight_bound(4), "{n} records in flight");
}

#[test]
fn dropping_a_stream_stops_its_source() {
    let config = Arc::new(RunConfig::default().with_batch_size(4).with_buffer_size(1));
    let produced = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let (p, d) = (Arc::clone(&produced), Arc::clone(&done));

    let stream = BatchStream::from_source("Endless", false, config, move |tx, config| {
        for order in 0.. {
            let records = vec![BioRecord::new("r", b"acgt"); config.batch_size];
            p.fetch_add(records.len(), Ordering::SeqCst);
            if tx.send(Batch::new(order, records)).is_err() {
                break;
            }
        }
        d.store(true, Ordering::SeqCst);
        Ok(())
    });

    assert!(stream.recv().is_some());
    drop(stream);

    let start = Instant::now();
    while !done.load(Ordering::SeqCst) {
        assert!(start.elapsed() < Duration::from_secs(10), "source never stopped");
        thread::sleep(Duration::from_millis(1));
    }
    assert!(produced.load(Ordering::SeqCst) <= 4 * 4);
}

#[test]
fn worker_error_is_reported() {
    struct Fails;

    impl SeqWorker for Fails {
        fn run(&self, record: BioRecord) -> ampliplex::errors::Result<Option<BioRecord>> {
            if record.id() == "r42" {
                return Err(ampliplex::errors::Error::InvalidParameter {
                    parameter: "record",
                    reason: "r42 is not welcome".to_owned(),
                });
            }
            Ok(Some(record))
        }

        fn name(&self) -> &'static str {
            "Fails"
        }
    }

    let config = Arc::new(RunConfig::default().with_batch_size(8));
    let res = BatchStream::from_records(random_records(100, 3), config)
        .make_worker(Fails, 3)
        .wait();
    assert!(matches!(
        res,
        Err(ampliplex::errors::Error::InvalidParameter { parameter: "record", .. })
    ));
}

#[test]
fn demultiplexing_is_deterministic() {
    const FWD: &str = "GGGCAATCCTGAGCCAA";
    const REV: &str = "CCATTGAGTCTCTGCACC";

    let mut lib = NgsLibrary::new();
    let primers = PrimerPair::new(FWD, REV);
    lib.add_pcr(primers.clone(), TagPair::new("acacacac", "gtgtgtgt"), Pcr::new("e", "s1"))
        .unwrap();
    lib.add_pcr(primers, TagPair::new("agcgagct", "gtgtgtgt"), Pcr::new("e", "s2"))
        .unwrap();
    lib.compile().unwrap();
    let lib = Arc::new(lib);

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    let reads: Vec<BioRecord> = (0..300)
        .map(|i| {
            let tag = if rng.gen_bool(0.5) { "acacacac" } else { "agcgagct" };
            let insert: String = (0..40).map(|_| ['a', 'c', 'g', 't'][rng.gen_range(0..4)]).collect();
            let mut read = format!("{tag}{FWD}{insert}").into_bytes();
            read.extend(ampliplex::iupac::reverse_complement(REV.as_bytes()));
            read.extend(ampliplex::iupac::reverse_complement(b"gtgtgtgt"));
            let record = BioRecord::new(format!("r{i}"), read);
            if rng.gen_bool(0.5) {
                record.reverse_complement()
            } else {
                record
            }
        })
        .collect();

    let run = |n_workers: usize| {
        let config = Arc::new(RunConfig::default().with_batch_size(16));
        let op = DemultiplexOp::new(Arc::clone(&lib), DemuxOptions::default()).unwrap();
        BatchStream::from_records(reads.clone(), config)
            .make_worker(op, n_workers)
            .collect()
            .unwrap()
    };

    let single = run(1);
    let parallel = run(4);
    assert_eq!(single, parallel);
    assert_eq!(single.len(), 300);
    assert_eq!(run(4), parallel);
}
