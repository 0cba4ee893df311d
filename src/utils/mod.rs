//! Utilities module for logging, errors, and helper functions
//!
//! This module provides:
//! - Structured logging with tracing
//! - The crate error type
//! - Small formatting helpers used by the CLI
//! - Natural file-name ordering for directory listings

use std::cmp::Ordering;

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{PokedexError, Result};
pub use logging::{init_logging, LogConfig, ProgressLogger, TrainingLogger};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Upper-case the first character of a label ("bulbasaur" -> "Bulbasaur")
pub fn title_case(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Compare names with digit runs ordered by value: `2.jpeg` < `10.jpeg`
///
/// Names that only differ in leading zeros fall back to plain string order.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut x, mut y) = (a, b);
    loop {
        match (x.is_empty(), y.is_empty()) {
            (true, true) => return a.cmp(b),
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        let (chunk_x, rest_x) = split_chunk(x);
        let (chunk_y, rest_y) = split_chunk(y);
        let numeric = |c: &str| c.starts_with(|ch: char| ch.is_ascii_digit());

        let order = if numeric(chunk_x) && numeric(chunk_y) {
            let (vx, vy) = (chunk_x.trim_start_matches('0'), chunk_y.trim_start_matches('0'));
            vx.len().cmp(&vy.len()).then_with(|| vx.cmp(vy))
        } else {
            chunk_x.cmp(chunk_y)
        };

        if order != Ordering::Equal {
            return order;
        }
        x = rest_x;
        y = rest_y;
    }
}

/// Split off the leading run of digits or non-digits
fn split_chunk(s: &str) -> (&str, &str) {
    let digits = s.starts_with(|c: char| c.is_ascii_digit());
    let end = s
        .find(|c: char| c.is_ascii_digit() != digits)
        .unwrap_or(s.len());
    s.split_at(end)
}
