use std::error::Error as StdError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a run.
///
/// Per-record problems (unassigned reads, primer dimers, rejected assemblies)
/// are not errors: they are written into the record annotations instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error compiling pattern \"{pattern}\": {source}")]
    PatternCompile {
        pattern: String,
        source: PatternError,
    },
    #[error("Invalid tag configuration in {context}: {reason}")]
    TagConfig { context: String, reason: String },
    #[error("Error reading CSV file \"{file}\": {source}")]
    Csv { file: String, source: csv::Error },
    #[error("Error parsing \"{string}\" in \"{context}\": {reason}")]
    Parse {
        string: String,
        context: String,
        reason: &'static str,
    },
    #[error("Error opening file \"{file}\": {source}")]
    FileIo {
        file: String,
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("Error reading or writing bytes: {0}")]
    BytesIo(Box<dyn StdError + Send + Sync>),
    #[error("Error parsing record {idx} from {origin}: {source}")]
    ParseRecord {
        origin: String,
        idx: usize,
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("Unpaired read in {0}")]
    UnpairedRead(String),
    #[error("Annotation error in {context} for record \"{id}\": {source}")]
    Annotation {
        source: AnnotationError,
        id: String,
        context: &'static str,
    },
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),
    #[error("A worker thread panicked in {0}")]
    WorkerPanicked(&'static str),
    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: &'static str, reason: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("the pattern is empty")]
    Empty,
    #[error("invalid character '{c}' at position {pos}")]
    InvalidChar { c: char, pos: usize },
    #[error("unclosed bracket")]
    UnclosedBracket,
    #[error("empty bracket class")]
    EmptyBracket,
    #[error("pattern length {len} exceeds the maximum of {max}")]
    TooLong { len: usize, max: usize },
    #[error("{errors} errors allowed for a pattern of length {len} would match everything")]
    TooManyErrors { errors: usize, len: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("expected {expected} for key \"{key}\" but got {found}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("\"{0}\" uses a reserved prefix but is not a known key")]
    UnknownReserved(String),
}

pub fn utf8(b: &[u8]) -> String {
    std::str::from_utf8(b).unwrap_or("<invalid utf8>").to_owned()
}
