//! FASTA/FASTQ input and output at the edges of a pipeline.

mod header;
pub use header::*;

mod fastq;
pub use fastq::*;
