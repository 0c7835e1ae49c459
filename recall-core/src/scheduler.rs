use crate::{
    Card, CardState, CoreError, Rating, DIFFICULTY_DEFAULT, DIFFICULTY_MAX, DIFFICULTY_MIN,
    STABILITY_MIN,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

// Sub-day steps for the learning loop, in minutes.
const STEP_AGAIN_MIN: i64 = 1;
const STEP_HARD_MIN: i64 = 6;
const STEP_GOOD_MIN: i64 = 10;
const RELEARN_STEP_MIN: i64 = 10;

// First-review seeds, indexed Again/Hard/Good/Easy.
const INITIAL_STABILITY: [f64; 4] = [0.5, 1.2, 2.5, 4.0];
const INITIAL_DIFFICULTY: [f64; 4] = [8.0, 6.5, 5.0, 3.5];

// Per-rating difficulty drift; difficulty also reverts toward the default.
const DIFFICULTY_DRIFT: [f64; 4] = [1.2, 0.6, -0.1, -0.7];
const MEAN_REVERSION: f64 = 0.05;

// Stability growth on a successful Review answer.
const GROWTH_RATE: f64 = 0.9;
const RATING_GROWTH: [f64; 4] = [0.0, 0.4, 1.0, 1.5];
const LAPSE_FACTOR: f64 = 0.5;
const LEARNING_DECAY: f64 = 0.7;
const EASY_BONUS: f64 = 1.5;

const MINUTES_PER_DAY: f64 = 24.0 * 60.0;

/// Result of committing one rating against one card's memory state.
#[derive(Clone, Debug)]
pub struct SchedulingUpdate {
    /// Card snapshot with the new memory state and due timestamp applied.
    pub card: Card,
    /// Interval in force before this review, in days.
    pub last_interval: f64,
}

/// Prospective due timestamp per rating, shown before the learner answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RatingPreviews {
    pub again: DateTime<Utc>,
    pub hard: DateTime<Utc>,
    pub good: DateTime<Utc>,
    pub easy: DateTime<Utc>,
}

impl RatingPreviews {
    pub fn due_for(&self, rating: Rating) -> DateTime<Utc> {
        match rating {
            Rating::Again => self.again,
            Rating::Hard => self.hard,
            Rating::Good => self.good,
            Rating::Easy => self.easy,
        }
    }
}

/// The memory-model capability consumed by the session queue.
///
/// `commit` must be pure with respect to its inputs: identical
/// (memory state, rating, now) yields identical output. Conforming
/// implementations grant intervals with Easy >= Good >= Hard >= Again, move a
/// Review card to Relearning on Again, bump `reps` by one per call, and bump
/// `lapses` by one exactly on Again from a non-New state.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn commit(
        &self,
        card: &Card,
        rating: Rating,
        now: DateTime<Utc>,
    ) -> Result<SchedulingUpdate, CoreError>;

    /// Due timestamp each rating would produce, without committing.
    async fn preview(&self, card: &Card, now: DateTime<Utc>)
        -> Result<RatingPreviews, CoreError>;
}

/// Default in-process scheduler: a forgetting-curve model over
/// (stability, difficulty) with power-law retrievability and a day-bounded
/// learning loop. Infallible and deterministic; never reads the wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryModel;

impl MemoryModel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Scheduler for MemoryModel {
    async fn commit(
        &self,
        card: &Card,
        rating: Rating,
        now: DateTime<Utc>,
    ) -> Result<SchedulingUpdate, CoreError> {
        Ok(apply(card, rating, now))
    }

    async fn preview(
        &self,
        card: &Card,
        now: DateTime<Utc>,
    ) -> Result<RatingPreviews, CoreError> {
        Ok(RatingPreviews {
            again: apply(card, Rating::Again, now).card.due,
            hard: apply(card, Rating::Hard, now).card.due,
            good: apply(card, Rating::Good, now).card.due,
            easy: apply(card, Rating::Easy, now).card.due,
        })
    }
}

fn rating_index(rating: Rating) -> usize {
    (rating.as_ordinal() - 1) as usize
}

/// Probability of recall after `elapsed` days at memory strength `stability`.
fn retrievability(stability: f64, elapsed: f64) -> f64 {
    let s = stability.max(STABILITY_MIN);
    1.0 / (1.0 + elapsed.max(0.0) / (9.0 * s))
}

fn clamp_difficulty(d: f64) -> f64 {
    d.clamp(DIFFICULTY_MIN, DIFFICULTY_MAX)
}

fn next_difficulty(current: f64, rating: Rating) -> f64 {
    let drift = DIFFICULTY_DRIFT[rating_index(rating)];
    let reverted = current + MEAN_REVERSION * (DIFFICULTY_DEFAULT - current);
    clamp_difficulty(reverted + drift)
}

fn elapsed_days(card: &Card, now: DateTime<Utc>) -> f64 {
    match card.last_review {
        Some(last) => ((now - last).num_seconds() as f64 / 86_400.0).max(0.0),
        None => 0.0,
    }
}

fn minutes_step(card: &mut Card, now: DateTime<Utc>, minutes: i64) {
    card.due = now + Duration::minutes(minutes);
    card.scheduled_days = minutes as f64 / MINUTES_PER_DAY;
}

fn days_interval(card: &mut Card, now: DateTime<Utc>, stability: f64) {
    let days = stability.round().max(1.0) as i64;
    card.due = now + Duration::days(days);
    card.scheduled_days = days as f64;
}

/// Pure transition: one card's memory state under one rating at one instant.
fn apply(card: &Card, rating: Rating, now: DateTime<Utc>) -> SchedulingUpdate {
    let mut next = card.clone();
    let last_interval = card.scheduled_days;
    let elapsed = elapsed_days(card, now);

    next.elapsed_days = elapsed;
    next.reps = card.reps + 1;
    if rating == Rating::Again && card.state != CardState::New {
        next.lapses = card.lapses + 1;
    }

    match card.state {
        CardState::New => {
            next.stability = INITIAL_STABILITY[rating_index(rating)];
            next.difficulty = INITIAL_DIFFICULTY[rating_index(rating)];
            match rating {
                Rating::Again => {
                    next.state = CardState::Learning;
                    minutes_step(&mut next, now, STEP_AGAIN_MIN);
                }
                Rating::Hard => {
                    next.state = CardState::Learning;
                    minutes_step(&mut next, now, STEP_HARD_MIN);
                }
                Rating::Good => {
                    next.state = CardState::Learning;
                    minutes_step(&mut next, now, STEP_GOOD_MIN);
                }
                Rating::Easy => {
                    next.state = CardState::Review;
                    let stability = next.stability;
                    days_interval(&mut next, now, stability);
                }
            }
        }
        CardState::Learning | CardState::Relearning => {
            next.difficulty = next_difficulty(card.difficulty, rating);
            match rating {
                Rating::Again => {
                    next.stability = (card.stability * LEARNING_DECAY).max(STABILITY_MIN);
                    minutes_step(&mut next, now, STEP_AGAIN_MIN);
                }
                Rating::Hard => {
                    minutes_step(&mut next, now, STEP_HARD_MIN);
                }
                Rating::Good => {
                    next.state = CardState::Review;
                    days_interval(&mut next, now, card.stability);
                }
                Rating::Easy => {
                    next.state = CardState::Review;
                    next.stability = card.stability * EASY_BONUS;
                    let stability = next.stability;
                    days_interval(&mut next, now, stability);
                }
            }
        }
        CardState::Review => {
            next.difficulty = next_difficulty(card.difficulty, rating);
            if rating == Rating::Again {
                next.state = CardState::Relearning;
                next.stability = (card.stability * LAPSE_FACTOR).max(STABILITY_MIN);
                minutes_step(&mut next, now, RELEARN_STEP_MIN);
            } else {
                let r = retrievability(card.stability, elapsed);
                let gain = (DIFFICULTY_MAX + 1.0 - next.difficulty) / 10.0
                    * GROWTH_RATE
                    * (1.0 + (1.0 - r))
                    * RATING_GROWTH[rating_index(rating)];
                next.stability = card.stability * (1.0 + gain);
                let stability = next.stability;
                days_interval(&mut next, now, stability);
            }
        }
    }

    next.last_review = Some(now);
    SchedulingUpdate {
        card: next,
        last_interval,
    }
}
