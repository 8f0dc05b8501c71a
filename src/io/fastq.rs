use needletail::*;

use flate2::{write::GzEncoder, Compression};
use log::debug;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::config::RunConfig;
use crate::errors::*;
use crate::io::header::*;
use crate::record::BioRecord;
use crate::stream::{Batch, BatchStream};

const DEFAULT_QUAL: u8 = 40;

struct FastxSource {
    reader: Box<dyn FastxReader>,
    origin: String,
    idx: usize,
}

impl FastxSource {
    fn new(reader: Box<dyn FastxReader>, origin: String) -> Self {
        Self {
            reader,
            origin,
            idx: 0,
        }
    }

    fn next_record(&mut self, quality_shift: u8, header: HeaderFormat) -> Option<Result<BioRecord>> {
        let idx = self.idx;
        let record = match self.reader.next()? {
            Ok(record) => record,
            Err(e) => {
                return Some(Err(Error::ParseRecord {
                    origin: self.origin.clone(),
                    idx,
                    source: Box::new(e),
                }))
            }
        };
        self.idx += 1;

        let parse_err = |source: Box<dyn std::error::Error + Send + Sync>| Error::ParseRecord {
            origin: self.origin.clone(),
            idx,
            source,
        };

        let line = match std::str::from_utf8(record.id()) {
            Ok(line) => line,
            Err(e) => return Some(Err(parse_err(Box::new(e)))),
        };
        let (id, rest) = line
            .split_once(|c: char| c.is_ascii_whitespace())
            .unwrap_or((line, ""));

        let mut res = BioRecord::new(id, record.seq());
        if let Some(qual) = record.qual() {
            let Some(qual) = qual
                .iter()
                .map(|&q| q.checked_sub(quality_shift))
                .collect::<Option<Vec<u8>>>()
            else {
                return Some(Err(parse_err("quality score below the quality shift".into())));
            };
            res = match res.with_qualities(qual) {
                Ok(res) => res,
                Err(e) => return Some(Err(e)),
            };
        }

        Some(parse_header(&mut res, rest, header).map(|_| res))
    }
}

fn open_file(file: impl AsRef<Path>) -> Result<FastxSource> {
    let origin = file.as_ref().display().to_string();
    let reader = parse_fastx_file(file.as_ref()).map_err(|e| Error::FileIo {
        file: origin.clone(),
        source: Box::new(e),
    })?;
    Ok(FastxSource::new(reader, origin))
}

fn stream_sources(
    mut sources: Vec<FastxSource>,
    header: HeaderFormat,
    config: Arc<RunConfig>,
) -> BatchStream {
    let paired = sources.len() == 2;

    BatchStream::from_source("InputFastx", paired, config, move |tx, config| {
        let shift = config.quality_shift;
        let mut order = 0;

        loop {
            let mut records = Vec::with_capacity(config.batch_size);
            let mut mates = Vec::with_capacity(if paired { config.batch_size } else { 0 });

            while records.len() < config.batch_size {
                let Some(record) = sources[0].next_record(shift, header) else {
                    if paired && sources[1].next_record(shift, header).is_some() {
                        return Err(Error::UnpairedRead(format!("\"{}\"", sources[1].origin)));
                    }
                    break;
                };
                records.push(record?);

                if paired {
                    let Some(mate) = sources[1].next_record(shift, header) else {
                        return Err(Error::UnpairedRead(format!("\"{}\"", sources[0].origin)));
                    };
                    mates.push(mate?);
                }
            }

            if records.is_empty() {
                break;
            }

            let batch = if paired {
                Batch::paired(order, records, mates)?
            } else {
                Batch::new(order, records)
            };
            if tx.send(batch).is_err() {
                break;
            }
            order += 1;
        }

        debug!("Read {} record(s) from {}", sources[0].idx, sources[0].origin);
        Ok(())
    })
}

/// Stream the FASTA/FASTQ records of a file (gzip allowed).
///
/// Header annotations are parsed with the given dialect and quality scores
/// are shifted down by the run's `quality_shift`.
pub fn read_fastx_file(
    file: impl AsRef<Path>,
    header: HeaderFormat,
    config: Arc<RunConfig>,
) -> Result<BatchStream> {
    Ok(stream_sources(vec![open_file(file)?], header, config))
}

/// Stream the read pairs of two files, as paired batches.
///
/// The files must hold the same number of records.
pub fn read_fastx_pairs(
    forward: impl AsRef<Path>,
    reverse: impl AsRef<Path>,
    header: HeaderFormat,
    config: Arc<RunConfig>,
) -> Result<BatchStream> {
    let sources = vec![open_file(forward)?, open_file(reverse)?];
    Ok(stream_sources(sources, header, config))
}

/// Stream the FASTA/FASTQ records of an arbitrary `Read`er.
pub fn read_fastx_reader(
    reader: impl std::io::Read + Send + 'static,
    header: HeaderFormat,
    config: Arc<RunConfig>,
) -> Result<BatchStream> {
    let reader = parse_fastx_reader(reader).map_err(|e| Error::BytesIo(Box::new(e)))?;
    Ok(stream_sources(
        vec![FastxSource::new(reader, "<reader>".to_owned())],
        header,
        config,
    ))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Fastq,
    Fasta,
}

pub struct FastxWriter {
    writer: Box<dyn Write + Send>,
    format: OutputFormat,
    header: HeaderFormat,
    quality_shift: u8,
}

impl FastxWriter {
    /// Write records to a file, gzip compressed if its name ends in `.gz`.
    pub fn to_file(
        file: impl AsRef<Path>,
        format: OutputFormat,
        header: HeaderFormat,
        config: &RunConfig,
    ) -> Result<Self> {
        let path = file.as_ref();
        let io_err = |e: std::io::Error| Error::FileIo {
            file: path.display().to_string(),
            source: Box::new(e),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let writer: Box<dyn Write + Send> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(BufWriter::new(GzEncoder::new(
                File::create(path).map_err(io_err)?,
                Compression::default(),
            )))
        } else {
            Box::new(BufWriter::new(File::create(path).map_err(io_err)?))
        };

        Ok(Self::to_writer(writer, format, header, config))
    }

    /// Write records to a `Write`r.
    pub fn to_writer(
        writer: impl Write + Send + 'static,
        format: OutputFormat,
        header: HeaderFormat,
        config: &RunConfig,
    ) -> Self {
        Self {
            writer: Box::new(writer),
            format,
            header,
            quality_shift: config.quality_shift,
        }
    }

    pub fn write_record(&mut self, record: &BioRecord) -> Result<()> {
        let header = format_header(record, self.header)?;
        let w = &mut *self.writer;

        let res = match self.format {
            OutputFormat::Fastq => write_fastq_record(w, record, &header, self.quality_shift),
            OutputFormat::Fasta => write_fasta_record(w, record, &header),
        };
        res.map_err(|e| Error::BytesIo(Box::new(e)))
    }

    /// Drain a stream into this writer. For paired streams only the first
    /// read of each pair is written; see
    /// [`write_paired_stream`](Self::write_paired_stream).
    pub fn write_stream(&mut self, stream: BatchStream) -> Result<()> {
        stream.for_each_batch(|batch| {
            for record in batch.records() {
                self.write_record(record)?;
            }
            Ok(())
        })?;
        self.flush()
    }

    /// Drain a paired stream, writing the mates to `mates`.
    pub fn write_paired_stream(&mut self, mates: &mut FastxWriter, stream: BatchStream) -> Result<()> {
        if !stream.is_paired() {
            return Err(Error::InvalidParameter {
                parameter: "stream",
                reason: "expected a paired stream".to_owned(),
            });
        }

        stream.for_each_batch(|batch| {
            for (i, record) in batch.records().iter().enumerate() {
                self.write_record(record)?;
                if let Some(mate) = batch.mate_of(i) {
                    mates.write_record(mate)?;
                }
            }
            Ok(())
        })?;
        mates.flush()?;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| Error::BytesIo(Box::new(e)))
    }
}

fn write_title(w: &mut (dyn Write + Send), marker: u8, id: &str, header: &str) -> std::io::Result<()> {
    w.write_all(&[marker])?;
    w.write_all(id.as_bytes())?;
    if !header.is_empty() {
        w.write_all(b" ")?;
        w.write_all(header.as_bytes())?;
    }
    w.write_all(b"\n")
}

fn write_fastq_record(
    w: &mut (dyn Write + Send),
    record: &BioRecord,
    header: &str,
    quality_shift: u8,
) -> std::io::Result<()> {
    write_title(w, b'@', record.id(), header)?;
    w.write_all(record.sequence())?;
    w.write_all(b"\n+\n")?;
    match record.qualities() {
        Some(q) => {
            let q = q.iter().map(|&q| q.saturating_add(quality_shift)).collect::<Vec<_>>();
            w.write_all(&q)?;
        }
        None => w.write_all(&vec![DEFAULT_QUAL + quality_shift; record.len()])?,
    }
    w.write_all(b"\n")
}

fn write_fasta_record(w: &mut (dyn Write + Send), record: &BioRecord, header: &str) -> std::io::Result<()> {
    write_title(w, b'>', record.id(), header)?;
    w.write_all(record.sequence())?;
    w.write_all(b"\n")
}
