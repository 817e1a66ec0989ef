//! Progress Reporter
//!
//! Turns extractor progress callbacks into human-readable log lines.

use std::sync::Mutex;

use crate::models::{Progress, ProgressUpdate};

/// Minimum change in percent before another "Downloading" line is produced.
const PERCENT_STEP: f64 = 0.5;

/// Stateful formatter for one download. Throttles repeated percentages so a
/// fast download doesn't flood the log.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    last_percent: Mutex<Option<f64>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Line to log for this update, or `None` if it is too close to the last one.
    pub fn report(&self, update: &ProgressUpdate) -> Option<String> {
        match update {
            ProgressUpdate::Downloading(p) => {
                let mut last = self
                    .last_percent
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());

                if let (Some(current), Some(previous)) = (p.percent, *last) {
                    if (current - previous).abs() < PERCENT_STEP && current < 99.9 {
                        return None;
                    }
                }
                if p.percent.is_some() {
                    *last = p.percent;
                }
                Some(describe_downloading(p))
            }
            ProgressUpdate::Finished => Some("Download finished, processing file...".to_string()),
            ProgressUpdate::PostProcessing { step } => Some(format!("Post-processing: {step}")),
        }
    }
}

/// `Downloading: 50.5% | Speed: 1.50 MiB/s | ETA: 00:30`
pub fn describe_downloading(p: &Progress) -> String {
    let percent = p
        .percent
        .map(|v| format!("{v:.1}%"))
        .unwrap_or_else(|| "N/A".to_string());
    let speed = p
        .speed_bps
        .map(|v| format!("{}/s", format_bytes(v)))
        .unwrap_or_else(|| "N/A".to_string());
    let eta = p
        .eta_seconds
        .map(format_eta)
        .unwrap_or_else(|| "N/A".to_string());

    format!("Downloading: {percent} | Speed: {speed} | ETA: {eta}")
}

/// Binary-prefixed size, e.g. `1.50 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// `MM:SS`, or `H:MM:SS` past an hour.
pub fn format_eta(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
