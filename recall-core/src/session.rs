use crate::{
    end_of_day, select_candidates, selector::repartition, Card, CardId, CoreError, DeckId, Rating,
    RatingPreviews, Repository, ReviewRecorder, Scheduler, SchedulingUpdate, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

const SCHEDULER_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// What `answer` reports back to the presentation layer.
#[derive(Clone, Debug)]
pub struct AnswerOutcome {
    pub card: Card,
    /// True when the card's new due landed inside the session day and the
    /// card went back into the queue.
    pub requeued: bool,
    pub remaining: usize,
}

/// One active study session: an exclusively-owned, ordered queue of card
/// snapshots. Created at session start, discarded at session end; an
/// abandoned session needs no cleanup because the next one rebuilds from
/// the store. Every mutating operation takes `&mut self`, so two answers
/// can never race on the same front-of-queue card.
pub struct StudySession {
    user_id: UserId,
    deck_id: DeckId,
    repo: Arc<dyn Repository>,
    scheduler: Arc<dyn Scheduler>,
    recorder: ReviewRecorder,
    queue: Vec<Card>,
}

impl StudySession {
    pub async fn start(
        repo: Arc<dyn Repository>,
        scheduler: Arc<dyn Scheduler>,
        user_id: UserId,
        deck_id: DeckId,
        now: DateTime<Utc>,
        max_new: usize,
    ) -> Self {
        let queue = select_candidates(repo.as_ref(), user_id, deck_id, now, max_new).await;
        tracing::debug!(%user_id, %deck_id, queued = queue.len(), "session started");
        let recorder = ReviewRecorder::new(repo.clone());
        Self {
            user_id,
            deck_id,
            repo,
            scheduler,
            recorder,
            queue,
        }
    }

    /// The card the learner is currently shown.
    pub fn peek(&self) -> Result<&Card, CoreError> {
        self.queue.first().ok_or(CoreError::EmptyQueue)
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn is_complete(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn cards(&self) -> &[Card] {
        &self.queue
    }

    /// Due timestamp each rating would give the current card.
    pub async fn preview(&self, now: DateTime<Utc>) -> Result<RatingPreviews, CoreError> {
        let card = self.peek()?;
        self.scheduler.preview(card, now).await
    }

    /// Core transition: schedule, persist, pop, day-bounded re-insert,
    /// re-partition. Any failure before the pop leaves the queue untouched,
    /// so the learner retries the same card without losing their place.
    pub async fn answer(
        &mut self,
        rating: Rating,
        now: DateTime<Utc>,
    ) -> Result<AnswerOutcome, CoreError> {
        let current = self.peek()?.clone();
        let update = self.commit_with_retry(&current, rating, now).await?;
        self.recorder.record(&update, rating, now).await?;

        self.queue.remove(0);
        let requeued = update.card.due <= end_of_day(now);
        if requeued {
            tracing::debug!(card = %update.card.id, due = %update.card.due, "requeued for today");
            self.queue.push(update.card.clone());
        }
        // Cohort membership can change as a direct result of the answer
        // (e.g. a Learning card graduating to Review mid-session), so the
        // queue is re-partitioned after every single one.
        self.queue = repartition(mem::take(&mut self.queue), now);

        Ok(AnswerOutcome {
            card: update.card,
            requeued,
            remaining: self.queue.len(),
        })
    }

    /// Merge externally-fetched candidates (e.g. a store refresh racing the
    /// session) into the live queue: dedup by card id, preferring the
    /// queue's own, more recent copy over a stale store read.
    pub fn reconcile(&mut self, fresh: Vec<Card>, now: DateTime<Utc>) {
        let known: HashSet<CardId> = self.queue.iter().map(|c| c.id).collect();
        self.queue.extend(
            fresh
                .into_iter()
                .filter(|c| !known.contains(&c.id) && !c.is_deleted()),
        );
        self.queue = repartition(mem::take(&mut self.queue), now);
    }

    /// Fetch fresh candidates from the store and reconcile them in.
    pub async fn refresh(&mut self, now: DateTime<Utc>, max_new: usize) {
        let fresh =
            select_candidates(self.repo.as_ref(), self.user_id, self.deck_id, now, max_new).await;
        self.reconcile(fresh, now);
    }

    async fn commit_with_retry(
        &self,
        card: &Card,
        rating: Rating,
        now: DateTime<Utc>,
    ) -> Result<SchedulingUpdate, CoreError> {
        match self.scheduler.commit(card, rating, now).await {
            Err(CoreError::SchedulerUnavailable(reason)) => {
                tracing::warn!(card = %card.id, reason, "scheduler unavailable, retrying once");
                tokio::time::sleep(SCHEDULER_RETRY_BACKOFF).await;
                self.scheduler.commit(card, rating, now).await
            }
            other => other,
        }
    }
}
