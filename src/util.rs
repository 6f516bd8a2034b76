// Utility helpers for parsing source cells and formatting console output.
//
// Spreadsheet exports are messy: codes arrive as `110000`, `110000.0` or
// `" 110000 "`, years as numbers or text, and blank names as "" or spaces.
// Everything here turns that into clean typed values or `None`.
use num_format::{Locale, ToFormattedString};

/// Parse an administrative code, accepting integral floats like `110000.0`.
pub fn parse_code_safe(s: Option<&str>) -> Option<u32> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(v) = s.parse::<u32>() {
        return Some(v);
    }
    let f = s.parse::<f64>().ok()?;
    code_from_f64(f)
}

pub fn code_from_f64(f: f64) -> Option<u32> {
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 {
        Some(f as u32)
    } else {
        None
    }
}

pub fn parse_year_safe(s: Option<&str>) -> Option<i32> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(y) = s.parse::<i32>() {
        return Some(y);
    }
    let f = s.parse::<f64>().ok()?;
    (f.fract() == 0.0 && f.abs() < 10_000.0).then_some(f as i32)
}

/// Trim a name; blank means "no name this year".
pub fn clean_name(s: Option<&str>) -> Option<String> {
    let s = s?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    n.to_formatted_string(&Locale::en)
}

/// Human-readable byte size for the artifact listing.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
