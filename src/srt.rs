//! SRT Serialization
//!
//! Formats timestamps and renders finished entries as SubRip blocks.

use crate::accumulator::FinishedEntry;

/// Formats milliseconds as `HH:MM:SS,mmm`. Negative values clamp to zero and
/// fractions of a millisecond are truncated.
pub fn millis_to_timestamp(total_millis: f64) -> String {
    let total_ms = total_millis.max(0.0) as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Renders one block: index, time range, text and the blank separator line.
pub fn render_entry(entry: &FinishedEntry) -> String {
    format!(
        "{}\n{} --> {}\n{}\n\n",
        entry.index,
        millis_to_timestamp(entry.start_ms),
        millis_to_timestamp(entry.end_ms),
        entry.text
    )
}
