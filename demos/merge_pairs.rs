use ampliplex::io::*;
use ampliplex::pe_align::PeAlignParams;
use ampliplex::stream::BatchStream;
use ampliplex::worker::*;
use ampliplex::*;

use env_logger::Env;
use log::info;

use std::sync::Arc;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Arc::new(RunConfig::default().with_batch_size(64));

    let reference: &[u8] =
        b"TTGACCGATGACGATCGTACGTAGCTAGCTACGACTGCATCGACTAGCTTGCAAGCTACGATCGATCGGGCATCGATCGTACGTCGCGATCGATCGGCGAT";
    let forward = BioRecord::new("pair1", &reference[..70])
        .with_qualities(vec![38; 70])
        .unwrap_or_else(|e| panic!("{e}"));
    let reverse = BioRecord::new("pair1", &reference[40..])
        .reverse_complement()
        .with_qualities(vec![35; reference.len() - 40])
        .unwrap_or_else(|e| panic!("{e}"));

    let unrelated_a = BioRecord::new("pair2", b"ACGTACGTACGTACGTACGTACGTACGTACGT");
    let unrelated_b = BioRecord::new("pair2", b"GGGGCCCCGGGGCCCCGGGGCCCCAAAATTTT");

    let op = PairedEndAlignOp::new(PeAlignParams::default()).unwrap_or_else(|e| panic!("{e}"));
    let merged = BatchStream::from_pairs(
        vec![forward, unrelated_a],
        vec![reverse, unrelated_b],
        Arc::clone(&config),
    )
    .make_slice_worker(op, config.n_workers)
    .make_worker(
        ForEachOp::new(|r: &mut BioRecord| {
            let mode = r.annotations().get_str("mode").unwrap_or("?").to_owned();
            info!("{}: {} bp ({mode})", r.id(), r.len());
        }),
        1,
    );

    let mut out = FastxWriter::to_file(
        "example_output/merged.fastq",
        OutputFormat::Fastq,
        HeaderFormat::Json,
        &config,
    )
    .unwrap_or_else(|e| panic!("{e}"));
    out.write_stream(merged).unwrap_or_else(|e| panic!("{e}"));
}
