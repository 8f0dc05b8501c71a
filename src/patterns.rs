use csv::{ReaderBuilder, Trim};
use log::info;

use std::path::Path;

use crate::apat::ApatPattern;
use crate::errors::*;
use crate::record::Value;
use crate::split::SplitOptions;

/// A set of named patterns, each with the same list of attributes.
#[derive(Debug, Clone, Default)]
pub struct Patterns {
    attr_names: Vec<String>,
    patterns: Vec<Pattern>,
}

impl Patterns {
    /// Patterns without attributes.
    pub fn from_strs(
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
        options: &SplitOptions,
    ) -> Result<Self> {
        let patterns = patterns
            .into_iter()
            .map(|p| Pattern::new(p.as_ref(), Vec::new(), options))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            attr_names: Vec::new(),
            patterns,
        })
    }

    pub fn new(
        attr_names: impl IntoIterator<Item = impl AsRef<str>>,
        patterns: impl IntoIterator<Item = Pattern>,
    ) -> Self {
        Self {
            attr_names: attr_names
                .into_iter()
                .map(|a| a.as_ref().to_owned())
                .collect(),
            patterns: patterns.into_iter().collect(),
        }
    }

    pub fn attr_names(&self) -> &[String] {
        &self.attr_names
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Attribute `name` of pattern `i`.
    pub fn attr(&self, i: usize, name: &str) -> Option<&Value> {
        let a = self.attr_names.iter().position(|n| n == name)?;
        self.patterns.get(i)?.attrs.get(a)
    }
}

/// A compiled pattern, with its reverse complement, and its attribute values.
#[derive(Debug, Clone)]
pub struct Pattern {
    name: String,
    attrs: Vec<Value>,
    forward: ApatPattern,
    reverse: ApatPattern,
}

impl Pattern {
    pub fn new(text: &str, attrs: Vec<Value>, options: &SplitOptions) -> Result<Self> {
        let forward = ApatPattern::compile(text, options.errors, options.allows_indels).map_err(
            |source| Error::PatternCompile {
                pattern: text.to_owned(),
                source,
            },
        )?;
        let reverse = forward.reverse_complement();

        Ok(Self {
            name: text.trim().to_ascii_lowercase(),
            attrs,
            forward,
            reverse,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attrs(&self) -> &[Value] {
        &self.attrs
    }

    pub fn forward(&self) -> &ApatPattern {
        &self.forward
    }

    pub fn reverse(&self) -> &ApatPattern {
        &self.reverse
    }
}

/// Read a split configuration: a CSV file with a `T-tag` column holding the
/// patterns and a `pcr_pool` column naming their group.
pub fn read_split_config(path: impl AsRef<Path>, options: &SplitOptions) -> Result<Patterns> {
    let path = path.as_ref();
    let file = path.display().to_string();
    let reader = std::fs::File::open(path).map_err(|e| Error::FileIo {
        file: file.clone(),
        source: Box::new(e),
    })?;
    read_split_config_from_reader(reader, &file, options)
}

pub fn read_split_config_from_reader(
    reader: impl std::io::Read,
    origin: &str,
    options: &SplitOptions,
) -> Result<Patterns> {
    let mut rdr = ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(reader);

    let csv_err = |source: csv::Error| Error::Csv {
        file: origin.to_owned(),
        source,
    };

    let header = rdr.headers().map_err(csv_err)?.clone();
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::TagConfig {
                context: origin.to_owned(),
                reason: format!("missing column \"{name}\""),
            })
    };
    let (tag_col, pool_col) = (column("T-tag")?, column("pcr_pool")?);

    let mut patterns = Vec::new();
    for row in rdr.records() {
        let row = row.map_err(csv_err)?;
        let (Some(tag), Some(pool)) = (row.get(tag_col), row.get(pool_col)) else {
            continue;
        };
        if tag.is_empty() {
            continue;
        }
        patterns.push(Pattern::new(tag, vec![Value::from(pool)], options)?);
    }

    info!("Loaded {} split pattern(s) from {}", patterns.len(), origin);
    Ok(Patterns::new(["pcr_pool"], patterns))
}
