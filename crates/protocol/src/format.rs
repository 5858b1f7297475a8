//! Textual presentation of readings

use crate::types::{Probe, Reading};

/// Format milli-degrees as degrees with three decimals (`"%3d.%03d"`)
///
/// Negative values keep their sign on the integer part, so the failure
/// sentinel renders as `" -0.001"`.
pub fn format_milli_celsius(value: i32) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let magnitude = value.unsigned_abs();
    let whole = format!("{}{}", sign, magnitude / 1000);
    format!("{:>3}.{:03}", whole, magnitude % 1000)
}

/// Attribute-file text for a reading
pub fn render_snapshot(reading: &Reading) -> String {
    format!(
        "Temperature in:  {}°C\nTemperature out: {}°C\n",
        format_milli_celsius(reading.inner_milli_c),
        format_milli_celsius(reading.outer_milli_c)
    )
}

/// One-line text for a single probe value
pub fn render_probe(probe: Probe, value: i32) -> String {
    format!("{} temperature = {}°C", probe.label(), format_milli_celsius(value))
}
