//! Approximate primer matching and multiplex demultiplexing for DNA
//! metabarcoding reads.
//!
//! # Overview
//! `ampliplex` takes sequencing reads from amplicon libraries and sorts them
//! out: which marker was amplified, which sample it came from, and what the
//! amplified region between the primers is.
//!
//! This is useful for:
//! * Assigning multiplexed reads to samples through their primer tags
//! * Assembling overlapping paired-end reads before assignment
//! * Cutting reads at known adapter or tag sequences
//! * Writing parallel read-processing pipelines
//!
//! ## Records
//! Every read is a [`BioRecord`]: an identifier, a lowercase IUPAC sequence,
//! optional Phred qualities (already shifted down to raw values), a count and
//! a map of typed [`Annotations`]. Operations report what they found (or why
//! they failed) in the annotations:
//! ```text
//! id: read6
//!  seq:  atcctgttttccaaaaaacaaaggttcagaaag
//!  direction = direct
//!  forward_error = 0
//!  forward_tag = agcgagct
//!  sample = s2
//! ```
//!
//! ## Pattern matching
//! [`apat`] compiles IUPAC patterns (with `[...]` base classes) into bit
//! masks and finds every occurrence with up to `k` mismatches or indels. [`pe_align`] assembles read pairs through
//! their overlap.
//!
//! ## Demultiplexing
//! An [`ngs::NgsLibrary`] holds the markers (primer pairs) and the PCRs
//! (tag pairs) of an experiment, usually loaded from a tag-list CSV with
//! [`ngs::read_tag_list`]. Once compiled, it cuts each read down to its
//! amplicon and assigns it to a sample.
//!
//! ## Pipelines
//! Reads flow through a [`stream::BatchStream`] in batches. Stages run on
//! their own threads and talk over bounded channels:
//! ```no_run
//! use ampliplex::io::*;
//! use ampliplex::ngs::read_tag_list;
//! use ampliplex::worker::*;
//! use ampliplex::RunConfig;
//! use std::sync::Arc;
//!
//! # fn main() -> ampliplex::errors::Result<()> {
//! let config = Arc::new(RunConfig::default());
//! let mut library = read_tag_list("tags.csv")?;
//! library.compile()?;
//!
//! let op = DemultiplexOp::new(Arc::new(library), DemuxOptions::default())?;
//! let reads = read_fastx_file("reads.fastq.gz", HeaderFormat::Json, Arc::clone(&config))?
//!     .make_worker(op, config.n_workers);
//!
//! let mut out = FastxWriter::to_file("out.fastq", OutputFormat::Fastq, HeaderFormat::Json, &config)?;
//! out.write_stream(reads)?;
//! # Ok(())
//! # }
//! ```
//!
//! Per-read failures never stop a pipeline: an unassigned read carries a
//! `demultiplex_error`, a pair that could not be aligned is joined with
//! `mode=join`. Only configuration and I/O problems are [`errors::Error`]s.

pub mod apat;
pub mod config;
pub mod errors;
pub mod io;
pub mod iupac;
pub mod ngs;
pub mod pe_align;
pub mod seed_search;
pub mod split;
pub mod stream;
pub mod worker;

mod parse_utils;
mod patterns;
mod record;

// commonly used functions and types

pub use crate::config::*;
pub use crate::patterns::*;
pub use crate::record::*;
