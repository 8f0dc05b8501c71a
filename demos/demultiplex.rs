use ampliplex::io::*;
use ampliplex::ngs::read_tag_list_from_reader;
use ampliplex::worker::*;
use ampliplex::*;

use env_logger::Env;
use log::info;

use std::io::Cursor;
use std::sync::Arc;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let tags = "\
@param,primer_mismatches,2
experiment,sample,sample_tag,forward_primer,reverse_primer,site
wolf,s01,acacacac:gtgtgtgt,GGGCAATCCTGAGCCAA,CCATTGAGTCTCTGCACC,north
wolf,s02,agcgagct:gtgtgtgt,GGGCAATCCTGAGCCAA,CCATTGAGTCTCTGCACC,south
";

    let fastq: &'static [u8] = b"@read1
ACACACACGGGCAATCCTGAGCCAAATCCTGTTTTCCAAAAAACAAAGGTTCAGAAAGGGTGCAGAGACTCAATGGACACACAC
+
IIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIII
@read2
GTGTGTGTCCATTGAGTCTCTGCACCAAAGATTTCGCGTTCGATCGATCCTAATTGGCTCAGGATTGCCCAGCTCGCT
+
IIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIII
@read3
AAAAAAAAGGGCAATCCTGAGCCAAGCATCGATCGGGCCCTAAATGGTGCAGAGACTCAATGGACACACAC
+
IIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIII
@read4
ACGATCGATGCATCGATCGATCGATGCTAGC
+
IIIIIIIIIIIIIIIIIIIIIIIIIIIIIII
";

    let config = Arc::new(RunConfig::default().with_batch_size(2));

    let mut library = read_tag_list_from_reader(tags.as_bytes(), "tags.csv")
        .unwrap_or_else(|e| panic!("{e}"));
    library.compile().unwrap_or_else(|e| panic!("{e}"));

    let op = DemultiplexOp::new(Arc::new(library), DemuxOptions::default())
        .unwrap_or_else(|e| panic!("{e}"));

    let (assigned, unassigned) =
        read_fastx_reader(Cursor::new(fastq), HeaderFormat::Json, Arc::clone(&config))
            .unwrap_or_else(|e| panic!("{e}"))
            .make_worker(op, config.n_workers)
            .make_worker(DbgOp::new(), 1)
            .divide_on(|r| !r.has_annotation("demultiplex_error"), config.batch_size);

    let mut failed = FastxWriter::to_file(
        "example_output/unassigned.fastq",
        OutputFormat::Fastq,
        HeaderFormat::Json,
        &config,
    )
    .unwrap_or_else(|e| panic!("{e}"));
    let failed = std::thread::spawn(move || failed.write_stream(unassigned));

    let mut out = FastxWriter::to_file(
        "example_output/assigned.fasta",
        OutputFormat::Fasta,
        HeaderFormat::Obi,
        &config,
    )
    .unwrap_or_else(|e| panic!("{e}"));
    let written = out.write_stream(assigned);

    // both sides of the split must finish before either result is checked
    let failed = failed
        .join()
        .unwrap_or_else(|_| panic!("unassigned writer panicked"));
    written.unwrap_or_else(|e| panic!("{e}"));
    failed.unwrap_or_else(|e| panic!("{e}"));
    info!("Done");
}
