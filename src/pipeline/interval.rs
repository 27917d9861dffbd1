//! Bar intervals supported by the cascade

use std::fmt;

/// Fixed bar interval
///
/// Mirrors the labels used in persisted table names (`bars_15s`, `bars_1min`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    Sec15,
    Sec30,
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
    Hour12,
    Day1,
}

impl Interval {
    /// Get interval as label string
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Sec15 => "15s",
            Interval::Sec30 => "30s",
            Interval::Min1 => "1min",
            Interval::Min5 => "5min",
            Interval::Min15 => "15min",
            Interval::Min30 => "30min",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Hour12 => "12h",
            Interval::Day1 => "1d",
        }
    }

    /// Get interval duration in seconds
    pub fn duration_secs(&self) -> i64 {
        match self {
            Interval::Sec15 => 15,
            Interval::Sec30 => 30,
            Interval::Min1 => 60,
            Interval::Min5 => 300,
            Interval::Min15 => 900,
            Interval::Min30 => 1_800,
            Interval::Hour1 => 3_600,
            Interval::Hour4 => 14_400,
            Interval::Hour12 => 43_200,
            Interval::Day1 => 86_400,
        }
    }

    /// Parse an interval label (`15s`, `1min`, `1h`, `1d`, ...)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "15s" => Some(Interval::Sec15),
            "30s" => Some(Interval::Sec30),
            "1min" | "1m" => Some(Interval::Min1),
            "5min" | "5m" => Some(Interval::Min5),
            "15min" | "15m" => Some(Interval::Min15),
            "30min" | "30m" => Some(Interval::Min30),
            "1h" => Some(Interval::Hour1),
            "4h" => Some(Interval::Hour4),
            "12h" => Some(Interval::Hour12),
            "1d" => Some(Interval::Day1),
            _ => None,
        }
    }

    /// Exchange kline label for this interval
    pub fn kline_label(&self) -> &'static str {
        match self {
            Interval::Sec15 | Interval::Sec30 => "1s",
            Interval::Min1 => "1m",
            Interval::Min5 => "5m",
            Interval::Min15 => "15m",
            Interval::Min30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Hour12 => "12h",
            Interval::Day1 => "1d",
        }
    }

    pub fn all() -> &'static [Interval] {
        &[
            Interval::Sec15,
            Interval::Sec30,
            Interval::Min1,
            Interval::Min5,
            Interval::Min15,
            Interval::Min30,
            Interval::Hour1,
            Interval::Hour4,
            Interval::Hour12,
            Interval::Day1,
        ]
    }

    /// Floor a timestamp (seconds) to the start of its bucket
    pub fn floor(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.duration_secs()) * self.duration_secs()
    }

    /// Volumes are summed per bucket only from one minute upwards.
    /// Sub-minute buckets take the max of their rows instead.
    pub fn sums_volume(&self) -> bool {
        self.duration_secs() >= 60
    }

    /// Number of bars of this interval in one day
    pub fn bars_per_day(&self) -> usize {
        (86_400 / self.duration_secs()) as usize
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
