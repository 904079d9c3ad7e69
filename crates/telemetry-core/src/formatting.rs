use crate::models::DataPoint;
use crate::time_utils::format_clock_time;

/// Reading value with two decimals.
///
/// ```
/// use telemetry_core::formatting::format_value;
///
/// assert_eq!(format_value(42.0), "42.00");
/// assert_eq!(format_value(99.999), "100.00");
/// ```
pub fn format_value(value: f64) -> String {
    format!("{value:.2}")
}

/// One reading as `HH:MM:SS=value`.
pub fn format_point(point: &DataPoint) -> String {
    format!(
        "{}={}",
        format_clock_time(&point.timestamp),
        format_value(point.value)
    )
}

/// One line per window snapshot: fill level followed by every reading,
/// oldest first.
///
/// # Examples
///
/// ```
/// use telemetry_core::formatting::format_snapshot;
///
/// assert_eq!(format_snapshot(&[], 10), "[0/10] (no data)");
/// ```
pub fn format_snapshot(points: &[DataPoint], capacity: usize) -> String {
    if points.is_empty() {
        return format!("[0/{}] (no data)", capacity);
    }
    let body: Vec<String> = points.iter().map(format_point).collect();
    format!("[{}/{}] {}", points.len(), capacity, body.join(" "))
}
