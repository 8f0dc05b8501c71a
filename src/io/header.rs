use serde::Serialize;
use serde_json::Deserializer;

use std::collections::BTreeMap;

use crate::errors::*;
use crate::parse_utils::*;
use crate::record::{Annotations, BioRecord, Value};

const CONTEXT: &str = "header";

/// How annotations are written after the identifier in a FASTA/FASTQ
/// header.
///
/// * `Json`: `@id {"count":2,"sample":"s1"} free text`
/// * `Obi`: `@id count=2; sample=s1; free text`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeaderFormat {
    #[default]
    Json,
    Obi,
}

#[derive(Serialize)]
struct JsonHeader<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    taxid: Option<u64>,
    #[serde(flatten)]
    annotations: &'a Annotations,
}

/// Read the annotations and definition of a header (the text after the
/// identifier) into `record`.
///
/// `count` and `taxid` go to the record fields, everything else to the
/// annotations. Text after the annotations becomes the definition.
pub fn parse_header(record: &mut BioRecord, header: &str, format: HeaderFormat) -> Result<()> {
    let (entries, rest) = match format {
        HeaderFormat::Json => parse_json_header(header)?,
        HeaderFormat::Obi => parse_obi_header(header)?,
    };

    for (key, value) in entries {
        match (key.as_str(), &value) {
            ("count", Value::Int(n)) if *n >= 0 => record.set_count(*n as u64),
            ("taxid", Value::Int(n)) if *n >= 0 => record.set_taxid(Some(*n as u64)),
            _ => record.annotate(key, value, CONTEXT)?,
        }
    }

    if !rest.is_empty() {
        record.set_definition(rest);
    }
    Ok(())
}

fn malformed(header: &str, reason: &'static str) -> Error {
    Error::Parse {
        string: header.to_owned(),
        context: CONTEXT.to_owned(),
        reason,
    }
}

fn parse_json_header(header: &str) -> Result<(Vec<(String, Value)>, &str)> {
    let trimmed = header.trim_start();
    if !trimmed.starts_with('{') {
        return Ok((Vec::new(), trimmed.trim_end()));
    }

    let mut stream = Deserializer::from_str(trimmed).into_iter::<BTreeMap<String, Value>>();
    let map = match stream.next() {
        Some(Ok(map)) => map,
        _ => return Err(malformed(header, "malformed JSON annotations")),
    };
    let rest = trimmed[stream.byte_offset()..].trim();

    Ok((map.into_iter().collect(), rest))
}

fn parse_obi_header(header: &str) -> Result<(Vec<(String, Value)>, &str)> {
    let mut entries = Vec::new();
    let mut rest = header.trim_start();

    while let Some((key, after)) = rest.split_once('=') {
        let key = key.trim_end();
        if check_valid_name(key.as_bytes()).is_none() {
            break;
        }
        let after = after.trim_start();

        let (value, tail) = if after.starts_with(['"', '{', '[']) {
            let mut stream = Deserializer::from_str(after).into_iter::<Value>();
            match stream.next() {
                Some(Ok(v)) => (v, &after[stream.byte_offset()..]),
                _ => return Err(malformed(header, "malformed quoted value")),
            }
        } else {
            let Some(end) = after.find(';') else {
                break;
            };
            (parse_scalar(after[..end].trim()), &after[end..])
        };

        let Some(tail) = tail.trim_start().strip_prefix(';') else {
            break;
        };
        entries.push((key.to_owned(), value));
        rest = tail.trim_start();
    }

    Ok((entries, rest.trim_end()))
}

/// Format the header text that follows the identifier of `record`.
pub fn format_header(record: &BioRecord, format: HeaderFormat) -> Result<String> {
    let count = (record.count() != 1).then_some(record.count());
    let taxid = record.taxid();

    let mut header = String::new();
    if count.is_some() || taxid.is_some() || !record.annotations().is_empty() {
        match format {
            HeaderFormat::Json => {
                let json = JsonHeader {
                    count,
                    taxid,
                    annotations: record.annotations(),
                };
                header = to_json(&json)?;
            }
            HeaderFormat::Obi => {
                let mut fields = Vec::with_capacity(record.annotations().len() + 2);
                if let Some(count) = count {
                    fields.push(format!("count={count};"));
                }
                if let Some(taxid) = taxid {
                    fields.push(format!("taxid={taxid};"));
                }
                for (k, v) in record.annotations().iter() {
                    fields.push(format!("{k}={};", format_obi_value(v)?));
                }
                header = fields.join(" ");
            }
        }
    }

    if !record.definition().is_empty() {
        if !header.is_empty() {
            header.push(' ');
        }
        header.push_str(record.definition());
    }
    Ok(header)
}

fn format_obi_value(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Str(s) if needs_quotes(s) => to_json(s)?,
        Value::Str(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format!("{f:?}"),
        Value::Bool(b) => b.to_string(),
        v => to_json(v)?,
    })
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::BytesIo(Box::new(e)))
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty()
        || s.trim() != s
        || s.contains([';', '=', '"'])
        || s.starts_with(['{', '['])
        || !matches!(parse_scalar(s), Value::Str(_))
}
