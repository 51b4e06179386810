//! Number parsing and formatting, and string/number coercion.

use crescent_core::value::TValue;

/// Parse a numeric literal: optional sign, decimal or `0x` hexadecimal,
/// surrounded by optional whitespace.
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (sign, rest) = match s.as_bytes()[0] {
        b'-' => (-1.0, &s[1..]),
        b'+' => (1.0, &s[1..]),
        _ => (1.0, s),
    };
    if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        if hex.is_empty() {
            return None;
        }
        let n = u64::from_str_radix(hex, 16).ok()?;
        return Some(sign * n as f64);
    }
    // Reject forms f64::from_str accepts but the language does not.
    if rest.starts_with("inf") || rest.starts_with("nan") || rest.starts_with("NaN") {
        return None;
    }
    rest.parse::<f64>().ok().map(|n| sign * n)
}

/// True when the number holds an exact integral value representable as i64.
pub fn is_integer(n: f64) -> bool {
    n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64
}

/// Canonical decimal form: integral values print without a fraction.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if is_integer(n) {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Coerce a value to a number: numbers pass through, strings parse.
pub fn to_number(v: TValue, strings: &crescent_core::string::StringInterner) -> Option<f64> {
    if let Some(n) = v.as_number() {
        return Some(n);
    }
    if let Some(sid) = v.as_string() {
        let s = std::str::from_utf8(strings.get_bytes(sid)).ok()?;
        return parse_number(s);
    }
    None
}

/// True for values concat and comparison may coerce to a string.
pub fn can_coerce_to_string(v: TValue) -> bool {
    v.is_number() || v.is_string()
}

/// String form of a string-or-number value, as raw bytes.
pub fn coerced_bytes(
    v: TValue,
    strings: &crescent_core::string::StringInterner,
) -> Option<Vec<u8>> {
    if let Some(sid) = v.as_string() {
        return Some(strings.get_bytes(sid).to_vec());
    }
    if let Some(n) = v.as_number() {
        return Some(number_to_string(n).into_bytes());
    }
    None
}
