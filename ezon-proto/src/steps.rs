//! Step series aggregation

use crate::reassembly::MINUTES_PER_DAY;

pub const HOURS_PER_DAY: usize = 24;
const MINUTES_PER_HOUR: usize = 60;

/// Sum of all per-minute counts
pub fn total(series: &[u8]) -> u32 {
    series.iter().map(|&n| u32::from(n)).sum()
}

/// Steps per hour; hour `h` is the sum of minutes `60h..60h+60`.
///
/// Minutes missing from a short series count as zero, minutes past the end
/// of the day are not attributed to any hour.
pub fn by_hour(series: &[u8]) -> [u32; HOURS_PER_DAY] {
    let mut hours = [0u32; HOURS_PER_DAY];
    let day = &series[..series.len().min(MINUTES_PER_DAY)];
    for (hour, minutes) in day.chunks(MINUTES_PER_HOUR).enumerate() {
        hours[hour] = total(minutes);
    }
    hours
}

/// Progress towards `target` as a ratio, 1.0 is the target reached.
///
/// The target is counted in whole hundreds, so anything below 100 (an unset
/// target reads as 0) gives infinity for a non-zero total. Not clamped.
pub fn ratio_of_target(total: u32, target: u32) -> f32 {
    if total == 0 {
        return 0.0;
    }
    let hundreds = target / 100;
    if hundreds == 0 {
        return f32::INFINITY;
    }
    total as f32 / hundreds as f32 / 100.0
}

/// Everything the renderer needs for one day
#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    pub total: u32,
    pub by_hour: [u32; HOURS_PER_DAY],
    pub ratio_of_target: f32,
    /// Minutes actually received, 1440 for a full day
    pub minutes: usize,
}

impl StepSummary {
    pub fn from_series(series: &[u8], target: u32) -> Self {
        let total = total(series);
        Self {
            total,
            by_hour: by_hour(series),
            ratio_of_target: ratio_of_target(total, target),
            minutes: series.len(),
        }
    }

    pub fn is_full_day(&self) -> bool {
        self.minutes >= MINUTES_PER_DAY
    }

    /// Hour with the most steps, `None` on a day without steps
    pub fn busiest_hour(&self) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        // max_by_key keeps the last maximum, walk backwards to get the first
        self.by_hour
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|(_, steps)| **steps)
            .map(|(hour, _)| hour)
    }
}
