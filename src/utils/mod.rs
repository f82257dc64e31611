//! Common utilities and helpers

pub mod logging;
pub mod path;

pub use logging::{LogFormat, LogLevel, LoggingConfig, LoggingSystem};
pub use path::PathUtils;

/// Format file size for display
pub fn format_file_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    let mut unit_index = 0;

    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit_index])
    }
}

/// Parse a stream id given in hex, with or without a `0x` prefix
pub fn parse_hex_id(value: &str) -> Option<i32> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return None;
    }
    i32::from_str_radix(digits, 16).ok()
}
