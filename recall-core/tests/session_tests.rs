use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use recall_core::{
    Card, CardState, CoreError, MemoryModel, MemoryRepo, Rating, RatingPreviews, Repository,
    Scheduler, SchedulingUpdate, StudySession,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

fn midday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()
}

async fn seed_review_card(
    repo: &MemoryRepo,
    user: Uuid,
    deck: Uuid,
    due: DateTime<Utc>,
) -> Card {
    let mut card = repo.add_card(user, deck, "q", "a").await.unwrap();
    card.state = CardState::Review;
    card.stability = 20.0;
    card.scheduled_days = 20.0;
    card.reps = 4;
    card.due = due;
    card.last_review = Some(due - Duration::days(20));
    repo.update_card(&card).await.unwrap()
}

async fn seed_learning_card(
    repo: &MemoryRepo,
    user: Uuid,
    deck: Uuid,
    due: DateTime<Utc>,
) -> Card {
    let mut card = repo.add_card(user, deck, "q", "a").await.unwrap();
    card.state = CardState::Learning;
    card.stability = 2.5;
    card.scheduled_days = 10.0 / 1440.0;
    card.reps = 1;
    card.due = due;
    card.last_review = Some(due - Duration::minutes(10));
    repo.update_card(&card).await.unwrap()
}

/// Scheduler that fails the first `failures` commits, then delegates.
struct FlakyScheduler {
    inner: MemoryModel,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyScheduler {
    fn failing(n: usize) -> Self {
        Self {
            inner: MemoryModel::new(),
            failures: AtomicUsize::new(n),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Scheduler for FlakyScheduler {
    async fn commit(
        &self,
        card: &Card,
        rating: Rating,
        now: DateTime<Utc>,
    ) -> Result<SchedulingUpdate, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CoreError::SchedulerUnavailable("simulated outage"));
        }
        self.inner.commit(card, rating, now).await
    }

    async fn preview(
        &self,
        card: &Card,
        now: DateTime<Utc>,
    ) -> Result<RatingPreviews, CoreError> {
        self.inner.preview(card, now).await
    }
}

#[tokio::test]
async fn learning_card_surfaces_before_overdue_review() {
    // Scenario B: learning card due in 2 minutes beats a review card due now.
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();

    let learning = seed_learning_card(&repo, user, deck.id, now + Duration::minutes(2)).await;
    let review = seed_review_card(&repo, user, deck.id, now).await;

    let session = StudySession::start(
        repo.clone(),
        Arc::new(MemoryModel::new()),
        user,
        deck.id,
        now,
        20,
    )
    .await;

    let ids: Vec<_> = session.cards().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![learning.id, review.id]);
}

#[tokio::test]
async fn lapsed_review_card_requeues_into_learning_cohort() {
    // Scenario C: Again on a Review card lands ten minutes out, inside the
    // session day, and the re-partition files it under its new state.
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();

    let lapsing = seed_review_card(&repo, user, deck.id, now).await;
    let other = seed_review_card(&repo, user, deck.id, now - Duration::hours(1)).await;

    let mut session = StudySession::start(
        repo.clone(),
        Arc::new(MemoryModel::new()),
        user,
        deck.id,
        now,
        20,
    )
    .await;
    assert_eq!(session.peek().unwrap().id, other.id);

    // Answer the older review card away first (it leaves the session).
    session.answer(Rating::Good, now).await.unwrap();
    assert_eq!(session.peek().unwrap().id, lapsing.id);

    let outcome = session.answer(Rating::Again, now).await.unwrap();
    assert!(outcome.requeued);
    assert_eq!(outcome.card.state, CardState::Relearning);
    assert_eq!(outcome.card.due, now + Duration::minutes(10));

    // Back at the front, now as a learning-cohort member.
    let front = session.peek().unwrap();
    assert_eq!(front.id, lapsing.id);
    assert_eq!(front.state, CardState::Relearning);
}

#[tokio::test]
async fn answering_last_card_completes_the_session() {
    // Scenario D: the queue reaches its terminal state and peek fails.
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();
    seed_review_card(&repo, user, deck.id, now).await;

    let mut session = StudySession::start(
        repo.clone(),
        Arc::new(MemoryModel::new()),
        user,
        deck.id,
        now,
        20,
    )
    .await;

    let outcome = session.answer(Rating::Easy, now).await.unwrap();
    assert!(!outcome.requeued);
    assert_eq!(outcome.remaining, 0);
    assert!(session.is_complete());
    assert!(matches!(session.peek(), Err(CoreError::EmptyQueue)));
    assert!(matches!(
        session.answer(Rating::Good, now).await,
        Err(CoreError::EmptyQueue)
    ));
}

#[tokio::test]
async fn transient_scheduler_failure_commits_exactly_once() {
    // Scenario E: one transient failure, one retry, one log row.
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();
    let card = seed_review_card(&repo, user, deck.id, now).await;

    let scheduler = Arc::new(FlakyScheduler::failing(1));
    let mut session =
        StudySession::start(repo.clone(), scheduler.clone(), user, deck.id, now, 20).await;

    session.answer(Rating::Good, now).await.unwrap();
    assert_eq!(scheduler.calls.load(Ordering::SeqCst), 2);

    let logs = repo.list_review_logs(user, card.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].rating, Rating::Good);
}

#[tokio::test]
async fn persistent_scheduler_failure_leaves_queue_untouched() {
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();
    let card = seed_review_card(&repo, user, deck.id, now).await;

    let scheduler = Arc::new(FlakyScheduler::failing(usize::MAX));
    let mut session =
        StudySession::start(repo.clone(), scheduler.clone(), user, deck.id, now, 20).await;

    let err = session.answer(Rating::Good, now).await.unwrap_err();
    assert!(matches!(err, CoreError::SchedulerUnavailable(_)));
    // Retried exactly once, then surfaced.
    assert_eq!(scheduler.calls.load(Ordering::SeqCst), 2);

    // The card is still at the front and nothing was persisted.
    assert_eq!(session.peek().unwrap().id, card.id);
    assert!(repo.list_review_logs(user, card.id).await.unwrap().is_empty());
    let stored = repo.get_card(user, card.id).await.unwrap();
    assert_eq!(stored.reps, card.reps);
}

#[tokio::test]
async fn answered_card_state_round_trips_through_store() {
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();
    let card = seed_review_card(&repo, user, deck.id, now).await;

    let mut session = StudySession::start(
        repo.clone(),
        Arc::new(MemoryModel::new()),
        user,
        deck.id,
        now,
        20,
    )
    .await;
    let outcome = session.answer(Rating::Hard, now).await.unwrap();

    let stored = repo.get_card(user, card.id).await.unwrap();
    assert_eq!(stored.reps, card.reps + 1);
    assert_eq!(stored.due, outcome.card.due);
    assert_eq!(stored.state, CardState::Review);

    let logs = repo.list_review_logs(user, card.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].last_interval, card.scheduled_days);
    assert_eq!(logs[0].stability, outcome.card.stability);
}

#[tokio::test]
async fn reconcile_prefers_live_queue_copy_over_stale_read() {
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();

    let queued = seed_learning_card(&repo, user, deck.id, now + Duration::minutes(5)).await;
    let mut session = StudySession::start(
        repo.clone(),
        Arc::new(MemoryModel::new()),
        user,
        deck.id,
        now,
        20,
    )
    .await;
    assert_eq!(session.remaining(), 1);

    // A stale store read of the queued card plus one genuinely new card.
    let mut stale = queued.clone();
    stale.due = now + Duration::hours(3);
    let incoming = seed_review_card(&repo, user, deck.id, now).await;

    session.reconcile(vec![stale, incoming.clone()], now);

    assert_eq!(session.remaining(), 2);
    let front = session.peek().unwrap();
    assert_eq!(front.id, queued.id);
    // The queue's own copy won the dedup.
    assert_eq!(front.due, queued.due);
    assert_eq!(session.cards()[1].id, incoming.id);
}

#[tokio::test]
async fn refresh_merges_newly_due_candidates() {
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();

    seed_review_card(&repo, user, deck.id, now).await;
    let mut session = StudySession::start(
        repo.clone(),
        Arc::new(MemoryModel::new()),
        user,
        deck.id,
        now,
        20,
    )
    .await;
    assert_eq!(session.remaining(), 1);

    // A card added after session start, picked up by the next poll.
    let added = repo.add_card(user, deck.id, "late", "late").await.unwrap();
    session.refresh(now, 20).await;

    assert_eq!(session.remaining(), 2);
    assert!(session.cards().iter().any(|c| c.id == added.id));
}

#[tokio::test]
async fn replayed_commit_inserts_single_log_row() {
    // Two commits with the same (card id, timestamp) key collapse to one
    // log row, the duplicate-answer guard behind the retry path.
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();
    let card = seed_review_card(&repo, user, deck.id, now).await;

    let update = MemoryModel::new().commit(&card, Rating::Good, now).await.unwrap();
    let recorder = recall_core::ReviewRecorder::new(repo.clone());
    recorder.record(&update, Rating::Good, now).await.unwrap();
    recorder.record(&update, Rating::Good, now).await.unwrap();

    let logs = repo.list_review_logs(user, card.id).await.unwrap();
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn session_preview_round_trips_with_commit() {
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();
    seed_review_card(&repo, user, deck.id, now).await;

    let mut session = StudySession::start(
        repo.clone(),
        Arc::new(MemoryModel::new()),
        user,
        deck.id,
        now,
        20,
    )
    .await;

    let previews = session.preview(now).await.unwrap();
    let outcome = session.answer(Rating::Easy, now).await.unwrap();
    assert_eq!(previews.due_for(Rating::Easy), outcome.card.due);
}
