//! Kubernetes resource quantities (`"100m"`, `"1Gi"`, `"2.5e3"`).

use std::cmp::Ordering;
use std::fmt;

/// Parsed quantity. Keeps the original text for rendering.
#[derive(Debug, Clone)]
pub struct Quantity {
    text: String,
    value: f64,
}

fn suffix_scale(suffix: &str) -> Option<f64> {
    let scale = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => return None,
    };
    Some(scale)
}

impl Quantity {
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        if s.is_empty() { return None; }
        let bytes = s.as_bytes();
        let mut i = 0;
        if bytes[0] == b'+' || bytes[0] == b'-' { i += 1; }
        let digits_start = i;
        while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') { i += 1; }
        if i == digits_start { return None; }
        let number: f64 = s[..i].parse().ok()?;
        let suffix = &s[i..];
        let value = if let Some(scale) = suffix_scale(suffix) {
            number * scale
        } else {
            let exp = suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E'))?;
            let exp: i32 = exp.parse().ok()?;
            number * 10f64.powi(exp)
        };
        Some(Self { text: s.to_string(), value })
    }

    pub fn from_f64(value: f64) -> Self {
        let text = if value.fract() == 0.0 && value.abs() < 1e15 { format!("{}", value as i64) } else { format!("{}", value) };
        Self { text, value }
    }

    pub fn as_f64(&self) -> f64 { self.value }

    /// Integer value rounded up, like `resource.Quantity.Value()`.
    pub fn value(&self) -> i64 { self.value.ceil() as i64 }

    /// Value in thousandths rounded up, like `resource.Quantity.MilliValue()`.
    pub fn milli_value(&self) -> i64 { (self.value * 1000.0).ceil() as i64 }

    pub fn as_str(&self) -> &str { &self.text }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool { self.value == other.value }
}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { self.value.partial_cmp(&other.value) }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.text) }
}
