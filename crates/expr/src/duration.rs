//! Go-style duration strings: `"300ms"`, `"1.5h"`, `"2h45m"`, `"-1m30s"`.

use chrono::Duration;

const NANOS_PER_MICRO: f64 = 1_000.0;
const NANOS_PER_MILLI: f64 = 1_000_000.0;
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

fn unit_nanos(unit: &str) -> Option<f64> {
    match unit {
        "ns" => Some(1.0),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60.0 * NANOS_PER_SEC),
        "h" => Some(3600.0 * NANOS_PER_SEC),
        _ => None,
    }
}

/// Parse a Go-style duration. Returns `None` for anything malformed.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let s = input.trim();
    if s.is_empty() { return None; }
    let (neg, mut rest) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if rest == "0" { return Some(Duration::zero()); }
    if rest.is_empty() { return None; }

    let mut total: f64 = 0.0;
    while !rest.is_empty() {
        let num_end = rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
        if num_end == 0 { return None; }
        let number: f64 = rest[..num_end].parse().ok()?;
        rest = &rest[num_end..];
        let unit_end = rest.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(rest.len());
        let scale = unit_nanos(&rest[..unit_end])?;
        rest = &rest[unit_end..];
        total += number * scale;
    }
    if !total.is_finite() || total > i64::MAX as f64 { return None; }
    let nanos = total.round() as i64;
    Some(Duration::nanoseconds(if neg { -nanos } else { nanos }))
}

fn trim_fraction(v: f64) -> String {
    let s = format!("{:.9}", v);
    let s = s.trim_end_matches('0');
    s.trim_end_matches('.').to_string()
}

/// Format like Go's `time.Duration.String()`.
pub fn format_duration(d: Duration) -> String {
    let Some(ns) = d.num_nanoseconds() else {
        // out of nanosecond range; fall back to whole seconds
        return format!("{}s", d.num_seconds());
    };
    if ns == 0 { return "0s".to_string(); }
    let sign = if ns < 0 { "-" } else { "" };
    let abs = ns.unsigned_abs();
    if abs < 1_000 {
        return format!("{}{}ns", sign, abs);
    }
    if abs < 1_000_000 {
        return format!("{}{}µs", sign, trim_fraction(abs as f64 / NANOS_PER_MICRO));
    }
    if abs < 1_000_000_000 {
        return format!("{}{}ms", sign, trim_fraction(abs as f64 / NANOS_PER_MILLI));
    }
    let hours = abs / 3_600_000_000_000;
    let rem = abs % 3_600_000_000_000;
    let mins = rem / 60_000_000_000;
    let secs = (rem % 60_000_000_000) as f64 / NANOS_PER_SEC;
    if hours > 0 {
        format!("{}{}h{}m{}s", sign, hours, mins, trim_fraction(secs))
    } else if mins > 0 {
        format!("{}{}m{}s", sign, mins, trim_fraction(secs))
    } else {
        format!("{}{}s", sign, trim_fraction(secs))
    }
}
