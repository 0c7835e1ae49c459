use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type DeckId = Uuid;
pub type CardId = Uuid;
pub type ReviewLogId = Uuid;

pub const DIFFICULTY_MIN: f64 = 1.0;
pub const DIFFICULTY_MAX: f64 = 10.0;
pub const DIFFICULTY_DEFAULT: f64 = 5.0;
pub const STABILITY_MIN: f64 = 0.1;

/// Learner feedback on one review, ordered weakest to strongest.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Again,
    Hard,
    Good,
    Easy,
}

impl Rating {
    pub const ALL: [Rating; 4] = [Rating::Again, Rating::Hard, Rating::Good, Rating::Easy];

    /// Stable ordinal used by storage backends.
    pub fn as_ordinal(&self) -> i64 {
        match self {
            Rating::Again => 1,
            Rating::Hard => 2,
            Rating::Good => 3,
            Rating::Easy => 4,
        }
    }

    pub fn from_ordinal(i: i64) -> Option<Rating> {
        match i {
            1 => Some(Rating::Again),
            2 => Some(Rating::Hard),
            3 => Some(Rating::Good),
            4 => Some(Rating::Easy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Again => "again",
            Rating::Hard => "hard",
            Rating::Good => "good",
            Rating::Easy => "easy",
        }
    }
}

/// Position of a card in the learning lifecycle.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CardState {
    #[default]
    New,
    Learning,
    Review,
    Relearning,
}

impl CardState {
    /// Learning and Relearning share the short-interval, same-day loop.
    pub fn in_learning_loop(&self) -> bool {
        matches!(self, CardState::Learning | CardState::Relearning)
    }

    pub fn as_ordinal(&self) -> i64 {
        match self {
            CardState::New => 0,
            CardState::Learning => 1,
            CardState::Review => 2,
            CardState::Relearning => 3,
        }
    }

    pub fn from_ordinal(i: i64) -> Option<CardState> {
        match i {
            0 => Some(CardState::New),
            1 => Some(CardState::Learning),
            2 => Some(CardState::Review),
            3 => Some(CardState::Relearning),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deck {
    pub id: DeckId,
    pub user_id: UserId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Deck {
    pub fn new(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// One learning item, owned by exactly one user within exactly one deck.
///
/// Memory-state invariants: `state == New` exactly when `reps == 0` exactly
/// when `last_review` is absent; `lapses` never decreases; a soft-deleted
/// card keeps its history but is invisible to selection and scheduling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub user_id: UserId,
    pub deck_id: DeckId,
    pub front: String,
    pub back: String,

    pub state: CardState,
    /// Memory strength in days; higher means slower forgetting.
    pub stability: f64,
    /// Intrinsic item hardness, clamped to [DIFFICULTY_MIN, DIFFICULTY_MAX].
    pub difficulty: f64,
    /// Days between the last review and the most recent one.
    pub elapsed_days: f64,
    /// Length in days of the interval granted by the last review.
    pub scheduled_days: f64,
    pub reps: u32,
    pub lapses: u32,
    pub due: DateTime<Utc>,
    pub last_review: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Card {
    pub fn new(
        user_id: UserId,
        deck_id: DeckId,
        front: impl Into<String>,
        back: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            deck_id,
            front: front.into(),
            back: back.into(),
            state: CardState::New,
            stability: 0.0,
            difficulty: DIFFICULTY_DEFAULT,
            elapsed_days: 0.0,
            scheduled_days: 0.0,
            reps: 0,
            lapses: 0,
            due: now,
            last_review: None,
            created_at: now,
            deleted_at: None,
        }
    }

    pub fn is_new(&self) -> bool {
        self.reps == 0
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Immutable record of one completed review.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewLog {
    pub id: ReviewLogId,
    pub card_id: CardId,
    pub user_id: UserId,
    pub rating: Rating,

    // Memory-model snapshot produced by this review.
    pub state: CardState,
    pub stability: f64,
    pub difficulty: f64,
    pub elapsed_days: f64,
    pub scheduled_days: f64,
    /// Interval in force before this review, in days.
    pub last_interval: f64,

    pub reviewed_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Final second of `now`'s UTC day. Always computed from the caller's clock
/// so day-boundary behavior stays testable and timezone-explicit.
pub fn end_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    midnight + Duration::days(1) - Duration::seconds(1)
}
