use crate::{Rating, ReviewLog};
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct Totals {
    pub total: u32,
    pub again: u32,
    pub hard: u32,
    pub good: u32,
    pub easy: u32,
}

impl Totals {
    pub fn record(&mut self, r: Rating) {
        self.total += 1;
        match r {
            Rating::Again => self.again += 1,
            Rating::Hard => self.hard += 1,
            Rating::Good => self.good += 1,
            Rating::Easy => self.easy += 1,
        }
    }

    /// Share of answers that were recalled at all (anything but Again).
    pub fn retention(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            (self.total - self.again) as f32 / self.total as f32
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ActivitySummary {
    pub totals: Totals,
    pub per_day: BTreeMap<NaiveDate, Totals>,
}

/// Day-bucketed review activity, the read-only input for downstream
/// statistics. Buckets follow the log's UTC review timestamp.
pub fn summarize(logs: &[ReviewLog]) -> ActivitySummary {
    let mut summary = ActivitySummary::default();
    for log in logs {
        summary.totals.record(log.rating);
        let day = log.reviewed_at.date_naive();
        summary.per_day.entry(day).or_default().record(log.rating);
    }
    summary
}

pub fn daily_streak(logs: &[ReviewLog], today: NaiveDate) -> u32 {
    let per_day = summarize(logs).per_day;
    let mut streak = 0u32;
    let mut day = today;
    loop {
        if per_day.get(&day).map(|t| t.total > 0).unwrap_or(false) {
            streak += 1;
            day -= Duration::days(1);
        } else {
            break;
        }
    }
    streak
}
