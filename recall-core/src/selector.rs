use crate::{end_of_day, Card, CardState, DeckId, Repository, UserId};
use chrono::{DateTime, Utc};

pub const DEFAULT_MAX_NEW: usize = 20;

/// Build the ordered candidate list for a session: the Learning cohort
/// (due by end of day), then the Review cohort (due now), then up to
/// `max_new` never-reviewed cards. The concatenation order, not a single
/// sort key, carries the priority: a plain due-ascending sort would starve
/// short-interval learning cards behind overdue review cards.
///
/// Fail-soft read: an unknown or unowned deck yields an empty list.
pub async fn select_candidates(
    repo: &dyn Repository,
    user_id: UserId,
    deck_id: DeckId,
    now: DateTime<Utc>,
    max_new: usize,
) -> Vec<Card> {
    if repo.get_deck(user_id, deck_id).await.is_err() {
        return Vec::new();
    }
    let cards = match repo.list_cards(user_id, Some(deck_id)).await {
        Ok(cards) => cards,
        Err(err) => {
            tracing::warn!(%user_id, %deck_id, error = %err, "candidate read failed");
            return Vec::new();
        }
    };
    order_candidates(cards, now, Some(max_new))
}

/// Cohort partition over an already-fetched card set. `max_new` caps the New
/// cohort on the initial selection; `None` skips the cap for mid-session
/// re-merges, where rationing already happened.
pub fn order_candidates(
    cards: Vec<Card>,
    now: DateTime<Utc>,
    max_new: Option<usize>,
) -> Vec<Card> {
    partition(cards, now, now, max_new)
}

/// Re-partition a live session queue after an answer. Same predicates as the
/// initial selection, except the Review horizon widens to end of day: the
/// day-bounded re-insert decides membership, this pass only orders.
pub fn repartition(queue: Vec<Card>, now: DateTime<Utc>) -> Vec<Card> {
    partition(queue, now, end_of_day(now), None)
}

fn partition(
    cards: Vec<Card>,
    now: DateTime<Utc>,
    review_horizon: DateTime<Utc>,
    max_new: Option<usize>,
) -> Vec<Card> {
    let eod = end_of_day(now);
    let mut learning = Vec::new();
    let mut review = Vec::new();
    let mut fresh = Vec::new();

    for card in cards {
        if card.is_deleted() {
            continue;
        }
        match card.state {
            CardState::Learning | CardState::Relearning if card.due <= eod => {
                learning.push(card)
            }
            CardState::Review if card.due <= review_horizon => review.push(card),
            CardState::New if card.reps == 0 => fresh.push(card),
            _ => {}
        }
    }

    // Ties on due (or creation time) break on card id, a stable key
    // independent of store iteration order.
    learning.sort_by_key(|c| (c.due, c.id));
    review.sort_by_key(|c| (c.due, c.id));
    fresh.sort_by_key(|c| (c.created_at, c.id));
    if let Some(cap) = max_new {
        fresh.truncate(cap);
    }

    let mut out = learning;
    out.append(&mut review);
    out.append(&mut fresh);
    out
}
