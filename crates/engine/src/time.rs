use std::time::Duration;

/// Playback positions are compared in whole microseconds.
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Converts a sampled position in seconds to microseconds.
///
/// Negative and non-finite samples collapse to zero.
///
/// # Example
/// ```
/// use engine::time::seconds_to_micros;
///
/// assert_eq!(seconds_to_micros(2.1), 2_100_000);
/// assert_eq!(seconds_to_micros(-0.3), 0);
/// ```
pub fn seconds_to_micros(seconds: f64) -> i64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    let micros = (seconds * MICROS_PER_SECOND as f64).round();
    micros.min(i64::MAX as f64) as i64
}

pub fn micros_to_seconds(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_SECOND as f64
}

/// Converts an authored delay in seconds to a wall-clock duration.
///
/// Returns `None` for zero, negative, non-finite or unrepresentable delays.
pub fn delay_from_seconds(seconds: f64) -> Option<Duration> {
    if seconds <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Half-open span `[appear, appear + width)` in which a branch point may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireWindow {
    width_us: i64,
}

impl FireWindow {
    pub fn new(width: Duration) -> Self {
        let width_us = i64::try_from(width.as_micros()).unwrap_or(i64::MAX).max(1);
        Self { width_us }
    }

    pub fn width_us(&self) -> i64 {
        self.width_us
    }

    /// Returns true when `position_us` lies inside the window opened at
    /// `appear_us`.
    pub fn contains(&self, appear_us: i64, position_us: i64) -> bool {
        position_us >= appear_us && position_us < appear_us.saturating_add(self.width_us)
    }
}
