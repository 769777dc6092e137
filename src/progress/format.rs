//! Human-readable sizes and durations for status lines

const UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];

/// Render a byte count with 1024-based units
///
/// Each step truncates, so 1536 bytes is `1 KB`, not `2 KB` or `1.5 KB`.
pub fn bytes_to_human_readable(bytes: u64) -> String {
    let mut value = bytes;
    let mut unit = 0;
    while unit + 1 < UNITS.len() && value / 1024 > 0 {
        value /= 1024;
        unit += 1;
    }
    format!("{} {}", value, UNITS[unit])
}

/// Render milliseconds as `MM:SS`, or `HH:MM:SS` once there is at least an hour
pub fn millis_to_human_readable(millis: u64) -> String {
    let total_secs = millis / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}
