use colored::*;
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::*;
use crate::iupac;

/// One annotation value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        use Value::*;
        match self {
            Str(_) => "string",
            Int(_) => "int",
            Float(_) => "float",
            Bool(_) => "bool",
            List(_) => "list",
            Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            v => write!(f, "{}", serde_json::to_string(v).map_err(|_| fmt::Error)?),
        }
    }
}

macro_rules! value_from {
    ($t:ty, $v:ident => $conv:expr) => {
        impl From<$t> for Value {
            fn from($v: $t) -> Self {
                $conv
            }
        }
    };
}

value_from!(&str, v => Value::Str(v.to_owned()));
value_from!(String, v => Value::Str(v));
value_from!(i64, v => Value::Int(v));
value_from!(usize, v => Value::Int(v as i64));
value_from!(f64, v => Value::Float(v));
value_from!(bool, v => Value::Bool(v));
value_from!(Vec<Value>, v => Value::List(v));
value_from!(BTreeMap<String, Value>, v => Value::Map(v));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Str,
    Int,
    Float,
    Bool,
    Map,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Kind::Str => "string",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Bool => "bool",
            Kind::Map => "map",
        }
    }

    fn accepts(self, v: &Value) -> bool {
        matches!(
            (self, v),
            (Kind::Str, Value::Str(_))
                | (Kind::Int, Value::Int(_))
                | (Kind::Float, Value::Float(_))
                | (Kind::Bool, Value::Bool(_))
                | (Kind::Map, Value::Map(_))
        )
    }
}

const RESERVED_PREFIXES: [&str; 6] = [
    "forward_",
    "reverse_",
    "ali_",
    "obisplit_",
    "demultiplex_",
    "microsat_",
];

fn reserved_kind(key: &str) -> Option<Kind> {
    use Kind::*;
    let kind = match key {
        "forward_primer" | "forward_match" | "forward_tag" | "reverse_primer" | "reverse_match"
        | "reverse_tag" | "direction" | "sample" | "experiment" | "demultiplex_error" | "mode"
        | "ali_dir" | "obisplit_group" | "obisplit_location" | "obisplit_left_pattern"
        | "obisplit_right_pattern" | "obisplit_left_match" | "obisplit_right_match"
        | "microsat_unit" | "microsat_left" | "microsat_right" | "microsat_unit_normalized" => Str,
        "forward_error" | "reverse_error" | "score" | "ali_length" | "seq_a_single"
        | "seq_b_single" | "seq_ab_match" | "seq_length" | "count" | "obisplit_frg"
        | "obisplit_nfrg" | "obisplit_left_error" | "obisplit_right_error"
        | "microsat_unit_length" | "microsat_unit_count" | "microsat_from" | "microsat_to" => Int,
        "score_norm" => Float,
        "obiminion_consensus" => Bool,
        _ if key.starts_with("merged_") => Map,
        _ => return None,
    };
    Some(kind)
}

/// Ordered string-keyed annotation map.
///
/// Reserved keys are type checked on insertion, and keys that use a reserved
/// prefix without being a known key are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Annotations(BTreeMap<String, Value>);

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> std::result::Result<(), AnnotationError> {
        let key = key.into();
        let value = value.into();
        Self::check(&key, &value)?;
        self.0.insert(key, value);
        Ok(())
    }

    fn check(key: &str, value: &Value) -> std::result::Result<(), AnnotationError> {
        match reserved_kind(key) {
            Some(kind) if !kind.accepts(value) => Err(AnnotationError::WrongType {
                key: key.to_owned(),
                expected: kind.name(),
                found: value.kind(),
            }),
            Some(_) => Ok(()),
            None if RESERVED_PREFIXES.iter().any(|p| key.starts_with(p)) => {
                Err(AnnotationError::UnknownReserved(key.to_owned()))
            }
            None => Ok(()),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_int)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_float)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Copy every entry of `other` into `self`, checking each key.
    pub fn extend_from(&mut self, other: &Annotations) -> std::result::Result<(), AnnotationError> {
        for (k, v) in other.iter() {
            self.set(k.clone(), v.clone())?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Forward,
    Reverse,
}

/// Back-reference to the mate of a paired record: its side and its index in
/// the owning batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mate {
    pub side: Side,
    pub index: u32,
}

/// A sequence record flowing through the pipeline.
///
/// Sequences are stored as lowercase IUPAC codes; qualities are raw Phred
/// values (the ASCII shift is removed at the I/O boundary).
#[derive(Debug, Clone, PartialEq)]
pub struct BioRecord {
    id: String,
    definition: String,
    sequence: Vec<u8>,
    qualities: Option<Vec<u8>>,
    annotations: Annotations,
    count: u64,
    taxid: Option<u64>,
    mate: Option<Mate>,
}

impl BioRecord {
    pub fn new(id: impl Into<String>, sequence: impl AsRef<[u8]>) -> Self {
        Self {
            id: id.into(),
            definition: String::new(),
            sequence: sequence.as_ref().to_ascii_lowercase(),
            qualities: None,
            annotations: Annotations::new(),
            count: 1,
            taxid: None,
            mate: None,
        }
    }

    pub fn with_qualities(mut self, qualities: impl Into<Vec<u8>>) -> Result<Self> {
        let qualities = qualities.into();
        check_qual_len(&self.id, self.sequence.len(), qualities.len())?;
        self.qualities = Some(qualities);
        Ok(self)
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = definition.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn set_definition(&mut self, definition: impl Into<String>) {
        self.definition = definition.into();
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn qualities(&self) -> Option<&[u8]> {
        self.qualities.as_deref()
    }

    pub fn has_qualities(&self) -> bool {
        self.qualities.is_some()
    }

    /// Replace the bases (and qualities) of the record.
    pub fn set_sequence(&mut self, sequence: Vec<u8>, qualities: Option<Vec<u8>>) -> Result<()> {
        if let Some(q) = &qualities {
            check_qual_len(&self.id, sequence.len(), q.len())?;
        }
        self.sequence = sequence;
        self.sequence.make_ascii_lowercase();
        self.qualities = qualities;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn annotations_mut(&mut self) -> &mut Annotations {
        &mut self.annotations
    }

    pub fn set_annotation(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> std::result::Result<(), AnnotationError> {
        self.annotations.set(key, value)
    }

    /// Like [`set_annotation`](Self::set_annotation), reporting failures as a
    /// run error tagged with the calling operation.
    pub fn annotate(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
        context: &'static str,
    ) -> Result<()> {
        self.annotations
            .set(key, value)
            .map_err(|source| Error::Annotation {
                source,
                id: self.id.clone(),
                context,
            })
    }

    pub fn has_annotation(&self, key: &str) -> bool {
        self.annotations.contains(key)
    }

    pub fn remove_annotation(&mut self, key: &str) -> Option<Value> {
        self.annotations.remove(key)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn set_count(&mut self, count: u64) {
        self.count = count;
    }

    pub fn taxid(&self) -> Option<u64> {
        self.taxid
    }

    pub fn set_taxid(&mut self, taxid: Option<u64>) {
        self.taxid = taxid;
    }

    pub fn mate(&self) -> Option<Mate> {
        self.mate
    }

    pub(crate) fn set_mate(&mut self, mate: Option<Mate>) {
        self.mate = mate;
    }

    /// Copy of `[from, to)` with the same metadata. The copy is not paired.
    pub fn subsequence(&self, from: usize, to: usize) -> BioRecord {
        let to = to.min(self.sequence.len());
        let from = from.min(to);

        BioRecord {
            id: self.id.clone(),
            definition: self.definition.clone(),
            sequence: self.sequence[from..to].to_vec(),
            qualities: self.qualities.as_ref().map(|q| q[from..to].to_vec()),
            annotations: self.annotations.clone(),
            count: self.count,
            taxid: self.taxid,
            mate: None,
        }
    }

    /// Reverse-complemented copy. The copy is not paired.
    pub fn reverse_complement(&self) -> BioRecord {
        let mut res = self.clone();
        res.mate = None;
        res.reverse_complement_in_place();
        res
    }

    /// Reverse complement the record it owns, for workers that own the record.
    pub fn reverse_complement_in_place(&mut self) {
        iupac::reverse_complement_in_place(&mut self.sequence);
        if let Some(q) = &mut self.qualities {
            q.reverse();
        }
    }
}

fn check_qual_len(id: &str, seq_len: usize, qual_len: usize) -> Result<()> {
    if seq_len != qual_len {
        return Err(Error::InvalidParameter {
            parameter: "qualities",
            reason: format!(
                "record \"{id}\" has {seq_len} bases but {qual_len} quality scores"
            ),
        });
    }
    Ok(())
}

impl fmt::Display for BioRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", "id:".bold(), self.id)?;
        if !self.definition.is_empty() {
            writeln!(f, " {}  {}", "def:".bold(), self.definition)?;
        }
        writeln!(f, " {}  {}", "seq:".bold(), String::from_utf8_lossy(&self.sequence))?;
        if let Some(q) = &self.qualities {
            let q = q.iter().map(|&q| (q.min(93) + 33) as char).collect::<String>();
            writeln!(f, " {} {}", "qual:".bold(), q)?;
        }
        if self.count != 1 {
            writeln!(f, " {} {}", "count:".bold(), self.count)?;
        }
        for (k, v) in self.annotations.iter() {
            writeln!(f, " {} = {}", k.cyan(), v)?;
        }
        if let Some(m) = self.mate {
            writeln!(f, " {} {:?} #{}", "mate:".bold(), m.side, m.index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lowercases() {
        let r = BioRecord::new("r1", "ACGTN");
        assert_eq!(r.sequence(), b"acgtn");
        assert_eq!(r.count(), 1);
        assert!(r.mate().is_none());
    }

    #[test]
    fn test_quality_length_checked() {
        assert!(BioRecord::new("r1", "ACGT").with_qualities(vec![30; 3]).is_err());
        assert!(BioRecord::new("r1", "ACGT").with_qualities(vec![30; 4]).is_ok());
    }

    #[test]
    fn test_reverse_complement_copy() {
        let r = BioRecord::new("r1", "AACG").with_qualities(vec![1, 2, 3, 4]).unwrap();
        let rc = r.reverse_complement();
        assert_eq!(rc.sequence(), b"cgtt");
        assert_eq!(rc.qualities().unwrap(), &[4, 3, 2, 1]);
        assert_eq!(r.sequence(), b"aacg");
    }

    #[test]
    fn test_subsequence() {
        let mut r = BioRecord::new("r1", "AACCGGTT").with_qualities(vec![10; 8]).unwrap();
        r.set_annotation("sample", "s1").unwrap();
        let s = r.subsequence(2, 6);
        assert_eq!(s.sequence(), b"ccgg");
        assert_eq!(s.qualities().unwrap().len(), 4);
        assert_eq!(s.annotations().get_str("sample"), Some("s1"));
        assert_eq!(r.subsequence(6, 20).sequence(), b"tt");
    }

    #[test]
    fn test_reserved_keys() {
        let mut a = Annotations::new();
        assert!(a.set("forward_error", 2i64).is_ok());
        assert_eq!(
            a.set("forward_error", "two"),
            Err(AnnotationError::WrongType {
                key: "forward_error".to_owned(),
                expected: "int",
                found: "string"
            })
        );
        assert_eq!(
            a.set("obisplit_foo", 1i64),
            Err(AnnotationError::UnknownReserved("obisplit_foo".to_owned()))
        );
        assert!(a.set("score_norm", 1.0).is_ok());
        assert!(a.set("merged_sample", BTreeMap::<String, Value>::new()).is_ok());
        assert!(a.set("merged_sample", "x").is_err());
        assert!(a.set("my_key", vec![Value::from(1i64)]).is_ok());
    }

    #[test]
    fn test_value_json_round_trip() {
        let mut a = Annotations::new();
        a.set("sample", "s1").unwrap();
        a.set("forward_error", 1i64).unwrap();
        a.set("score_norm", 0.5).unwrap();
        a.set("flag", true).unwrap();

        let json = serde_json::to_string(&a).unwrap();
        let back: Annotations = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
