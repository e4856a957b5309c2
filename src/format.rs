use chrono::{DateTime, Local, Utc};

/// Shown in place of any value that is unknown while no session runs
pub const PLACEHOLDER: &str = "---";

pub fn coefficient(value: f64) -> String {
    format!("{value:.5}")
}

/// Secondary display keeps one digit less
pub fn coefficient_label(value: f64) -> String {
    format!("Coefficient {value:.4}")
}

/// Efficiency fraction shown as a whole percentage
pub fn efficiency(value: f64) -> String {
    format!("{:.0}%", value * 100.0)
}

pub fn spm(value: Option<f64>) -> String {
    value.map_or_else(|| PLACEHOLDER.to_string(), |v| format!("{v:.1}"))
}

pub fn volume(value: Option<f64>) -> String {
    value.map_or_else(|| PLACEHOLDER.to_string(), |v| format!("{v:.3}"))
}

pub fn elapsed(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds else {
        return PLACEHOLDER.to_string();
    };
    let total = seconds.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

pub fn start_time(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(
        || PLACEHOLDER.to_string(),
        |t| t.with_timezone(&Local).format("%-I:%M:%S %p").to_string(),
    )
}
