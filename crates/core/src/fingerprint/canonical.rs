//! Canonical JSON rendering.
//!
//! Object keys are emitted in sorted order and no whitespace is produced, so
//! two payloads that differ only in key order or formatting render to the
//! same bytes. This does not depend on whether `serde_json` was built with
//! `preserve_order`.
//!
//! Floats with no fractional part that fit a JSON-safe integer render as that
//! integer, so `1`, `1.0` and `1e0` produce the same key. Other numbers use
//! `serde_json`'s shortest round-trip form.

use serde_json::{Number, Value};

/// Largest magnitude at which every integer is exactly representable as `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Render `value` canonically.
#[must_use]
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn write_number(out: &mut String, n: &Number) {
    if n.is_f64() {
        if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER) {
            // Exact: `f` is integral and within the safe range. `-0.0` becomes `0`.
            out.push_str(&(f as i64).to_string());
            return;
        }
    }
    out.push_str(&n.to_string());
}

fn write_string(out: &mut String, s: &str) {
    // serde_json's string escaping is already canonical (minimal escapes).
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}
