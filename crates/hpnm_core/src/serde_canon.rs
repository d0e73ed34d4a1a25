//! Canonical JSON serialization for commitment inputs
//!
//! Provides canonical JSON serialization with:
//! - Sorted map keys at every depth
//! - No whitespace for commitment payloads
//! - Shortest round-trip floats in Python `repr` layout (`5e-05`, `1e+16`,
//!   `2.0`), so payloads match `json.dumps(..., separators=(',', ':'))`
//!
//! The pretty variant keeps the same key order but indents with two spaces;
//! it is used for human-readable artifacts, never as HMAC input.

use crate::errors::Result;
use serde::Serialize;
use serde_json::{
    map::Map,
    ser::{Formatter, PrettyFormatter},
    Serializer, Value,
};
use std::io::{self, Write};

/// Compact formatter whose floats follow Python's `repr`.
struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn write_f32<W: ?Sized + Write>(&mut self, writer: &mut W, value: f32) -> io::Result<()> {
        self.write_f64(writer, f64::from(value))
    }

    fn write_f64<W: ?Sized + Write>(&mut self, writer: &mut W, value: f64) -> io::Result<()> {
        writer.write_all(format_float(value).as_bytes())
    }
}

/// Shortest round-trip text of `value`, laid out like Python's `float.__repr__`:
/// positional when the decimal exponent is in `[-4, 16)`, otherwise
/// scientific with a signed, at least two-digit exponent.
pub fn format_float(value: f64) -> String {
    if !value.is_finite() {
        return "null".to_string();
    }
    // `{:e}` yields the shortest round-trip digits, e.g. `-1.25e-7`
    let sci = format!("{:e}", value);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(m) => ("-", m),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let n = digits.len() as i32;
    // position of the decimal point relative to the first digit
    let point = exp + 1;

    let body = if (-4 < point) && point <= 16 {
        if point <= 0 {
            format!("0.{}{}", "0".repeat((-point) as usize), digits)
        } else if point < n {
            let (int, frac) = digits.split_at(point as usize);
            format!("{}.{}", int, frac)
        } else {
            format!("{}{}.0", digits, "0".repeat((point - n) as usize))
        }
    } else {
        let (first, rest) = digits.split_at(1);
        let frac = if rest.is_empty() {
            String::new()
        } else {
            format!(".{}", rest)
        };
        let exp_sign = if exp < 0 { '-' } else { '+' };
        format!("{}{}e{}{:02}", first, frac, exp_sign, exp.abs())
    };
    format!("{}{}", sign, body)
}

/// Recursively sort JSON object keys to obtain a canonical representation.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::with_capacity(entries.len());
            for (key, val) in entries {
                sorted.insert(key, canonicalize(val));
            }

            Value::Object(sorted)
        }
        Value::Array(elements) => Value::Array(elements.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serialize a value to canonical compact JSON (sorted keys, no whitespace).
pub fn to_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let canonical = canonicalize(serde_json::to_value(value)?);
    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, CanonicalFormatter);
    canonical.serialize(&mut serializer)?;
    // serde_json only emits UTF-8
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// UTF-8 bytes of [`to_canonical_json`]; the input to every HMAC and digest.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(to_canonical_json(value)?.into_bytes())
}

/// Serialize a value as sorted-key JSON with two-space indentation.
pub fn write_canonical_pretty<T, W>(mut writer: W, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    W: Write,
{
    let canonical_value = canonicalize(serde_json::to_value(value)?);
    let formatter = PrettyFormatter::with_indent(b"  ");
    let mut serializer = Serializer::with_formatter(&mut writer, formatter);
    canonical_value.serialize(&mut serializer)?;
    Ok(())
}

/// [`write_canonical_pretty`] into a `String`.
pub fn canonical_pretty_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut buffer = Vec::new();
    write_canonical_pretty(&mut buffer, value)?;
    // serde_json only emits UTF-8
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
