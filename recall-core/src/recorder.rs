use crate::{CoreError, Rating, Repository, ReviewLog, SchedulingUpdate};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Commits one review outcome: the card's new memory state plus one
/// append-only log row, through the repository's single transactional
/// boundary. The log row snapshots the post-review memory state, so the
/// statistics collaborator never has to re-derive it.
#[derive(Clone)]
pub struct ReviewRecorder {
    repo: Arc<dyn Repository>,
}

impl ReviewRecorder {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub async fn record(
        &self,
        update: &SchedulingUpdate,
        rating: Rating,
        reviewed_at: DateTime<Utc>,
    ) -> Result<ReviewLog, CoreError> {
        let card = &update.card;
        let log = ReviewLog {
            id: Uuid::new_v4(),
            card_id: card.id,
            user_id: card.user_id,
            rating,
            state: card.state,
            stability: card.stability,
            difficulty: card.difficulty,
            elapsed_days: card.elapsed_days,
            scheduled_days: card.scheduled_days,
            last_interval: update.last_interval,
            reviewed_at,
            deleted_at: None,
        };
        self.repo.commit_review(card, &log).await?;
        Ok(log)
    }
}
