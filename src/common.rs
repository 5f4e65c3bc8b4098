//! Common time utilities shared by the acquisition loop and the exporter

use chrono::{DateTime, Local, TimeZone};
use std::time::Instant;

/// File-name timestamp format, e.g. `07_04_2024_13_05_59`
pub const FILE_STAMP_FORMAT: &str = "%m_%d_%Y_%H_%M_%S";

/// Source of sample timestamps
///
/// Timestamps are wall-clock seconds since the Unix epoch with sub-second
/// precision, so windows can be compared against "now" across restarts.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> f64;
}

/// Wall clock backed by `chrono::Utc::now()`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        let now = chrono::Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
    }
}

/// Tracks elapsed time since creation
pub struct TimeKeeper {
    start: Instant,
}

impl TimeKeeper {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a local time for use inside file names
pub fn file_stamp<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format(FILE_STAMP_FORMAT).to_string()
}

/// Convert epoch seconds to local time, if representable
pub fn local_time(epoch_secs: f64) -> Option<DateTime<Local>> {
    let secs = epoch_secs.floor();
    let nanos = ((epoch_secs - secs) * 1_000_000_000.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999)).map(|utc| utc.with_timezone(&Local))
}

/// `HH:MM:SS` label for an epoch timestamp (used on plot time axes)
pub fn clock_label(epoch_secs: f64) -> String {
    local_time(epoch_secs)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_file_stamp_format() {
        let time = Utc.with_ymd_and_hms(2024, 7, 4, 13, 5, 59).unwrap();
        assert_eq!(file_stamp(&time), "07_04_2024_13_05_59");
    }

    #[test]
    fn test_system_clock_is_epoch_seconds() {
        let now = SystemClock.now_secs();
        // Later than 2020-01-01
        assert!(now > 1_577_836_800.0);
    }

    #[test]
    fn test_local_time_roundtrip() {
        let time = local_time(1_700_000_000.25).unwrap();
        assert_eq!(time.timestamp(), 1_700_000_000);
        assert_eq!(time.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_clock_label_shape() {
        let label = clock_label(1_700_000_000.0);
        assert_eq!(label.len(), 8);
        assert_eq!(label.matches(':').count(), 2);
    }

    #[test]
    fn test_timekeeper() {
        let keeper = TimeKeeper::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = keeper.elapsed_secs();
        assert!(elapsed >= 0.01);
        assert!(elapsed < 1.0);
    }
}
