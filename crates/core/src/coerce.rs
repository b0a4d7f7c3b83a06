//! Total conversions from untrusted cell values into strict types.
//!
//! None of these functions can fail: malformed input yields the type's
//! default (`0`, `false`, or a fallback literal).

use crate::value::Value;

pub const NOT_AVAILABLE: &str = "N/A";

/// Fallback used by [`to_text`] when the source cell is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFallback {
    /// Identity fields (name, unit, location): a blank means "not collected".
    Blank,
    /// Category fields: "collected but unspecified".
    NotAvailable,
}

impl TextFallback {
    pub fn literal(&self) -> &'static str {
        match self {
            TextFallback::Blank => "",
            TextFallback::NotAvailable => NOT_AVAILABLE,
        }
    }
}

pub fn to_number(raw: &Value) -> f64 {
    match raw {
        Value::Number(n) if n.is_finite() => *n,
        Value::Text(s) => parse_stripped(s),
        _ => 0.0,
    }
}

pub fn to_integer(raw: &Value) -> f64 {
    to_number(raw).trunc()
}

fn parse_stripped(raw: &str) -> f64 {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
        .collect();
    parse_float_prefix(&kept).unwrap_or(0.0)
}

pub fn to_boolean(raw: &Value) -> bool {
    match raw {
        Value::Bool(b) => *b,
        Value::Number(n) => *n == 1.0,
        Value::Text(s) => matches!(s.trim().to_lowercase().as_str(), "yes" | "true" | "1"),
        Value::Null => false,
    }
}

pub fn to_text(raw: &Value, fallback: TextFallback) -> String {
    if raw.is_empty() {
        return fallback.literal().to_string();
    }
    raw.to_string()
}

/// Parses the leading numeric portion of a string, the way spreadsheet-style
/// "number-ish" detection treats `"12 kg"` as `12`. Rejects `inf`/`nan`.
pub fn parse_float_prefix(raw: &str) -> Option<f64> {
    let s = raw.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end].parse::<f64>().ok().filter(|n| n.is_finite())
}
