use chrono::{DateTime, Utc};
use recall_core::{Card, CardState, Rating};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize)]
pub struct DeckOut {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct CardOut {
    pub id: Uuid,
    pub deck_id: Uuid,
    pub front: String,
    pub back: String,
    pub state: CardState,
    pub due: DateTime<Utc>,
    pub reps: u32,
    pub lapses: u32,
}

impl From<Card> for CardOut {
    fn from(c: Card) -> Self {
        Self {
            id: c.id,
            deck_id: c.deck_id,
            front: c.front,
            back: c.back,
            state: c.state,
            due: c.due,
            reps: c.reps,
            lapses: c.lapses,
        }
    }
}

#[derive(Deserialize)]
pub struct AnswerIn {
    pub card_id: Uuid,
    /// Wire form of the rating; round-trips the snake_case serde names.
    pub rating: Rating,
    /// Review instant; defaults to the server's current time.
    pub now: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct AnswerOut {
    pub card: CardOut,
    /// Whether the card stays in today's session window.
    pub requeued: bool,
}

#[derive(Serialize)]
pub struct PreviewOut {
    pub again: DateTime<Utc>,
    pub hard: DateTime<Utc>,
    pub good: DateTime<Utc>,
    pub easy: DateTime<Utc>,
}
