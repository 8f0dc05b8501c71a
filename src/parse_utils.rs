use crate::record::Value;

/// Annotation keys: letters, digits, `_`, `-` and `.`, not starting with a
/// digit.
pub fn check_valid_name(b: &[u8]) -> Option<&[u8]> {
    match b.first() {
        Some(c) if c.is_ascii_alphabetic() || *c == b'_' => (),
        _ => return None,
    }

    for &c in b {
        match c {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-' | b'.' => (),
            _ => return None,
        }
    }

    Some(b)
}

/// Read a bare header token as the most specific scalar it spells.
pub fn parse_scalar(s: &str) -> Value {
    if let Ok(i) = s.parse::<i64>() {
        return Value::Int(i);
    }
    // digits required so that "nan" or "inf" stay strings
    if s.bytes().any(|c| c.is_ascii_digit()) {
        if let Ok(f) = s.parse::<f64>() {
            return Value::Float(f);
        }
    }
    match s {
        "true" | "True" => Value::Bool(true),
        "false" | "False" => Value::Bool(false),
        _ => Value::Str(s.to_owned()),
    }
}
