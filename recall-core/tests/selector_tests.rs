use chrono::{DateTime, Duration, TimeZone, Utc};
use recall_core::{
    daily_streak, select_candidates, summarize, CardState, MemoryRepo, Rating, Repository,
    ReviewLog,
};
use std::sync::Arc;
use uuid::Uuid;

fn midday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()
}

#[tokio::test]
async fn fresh_deck_returns_new_cards_in_creation_order() {
    // Scenario A: three New cards, max_new = 20, nothing else due.
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();

    let mut first = repo.add_card(user, deck.id, "uno", "one").await.unwrap();
    first.created_at = now - Duration::hours(3);
    repo.update_card(&first).await.unwrap();
    let mut second = repo.add_card(user, deck.id, "dos", "two").await.unwrap();
    second.created_at = now - Duration::hours(2);
    repo.update_card(&second).await.unwrap();
    let mut third = repo.add_card(user, deck.id, "tres", "three").await.unwrap();
    third.created_at = now - Duration::hours(1);
    repo.update_card(&third).await.unwrap();

    let cards = select_candidates(repo.as_ref(), user, deck.id, now, 20).await;
    let ids: Vec<_> = cards.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![first.id, second.id, third.id]);
    assert!(cards.iter().all(|c| c.state == CardState::New));
}

#[tokio::test]
async fn max_new_rations_first_exposures() {
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();
    for i in 0..5 {
        let mut c = repo
            .add_card(user, deck.id, &format!("q{i}"), "a")
            .await
            .unwrap();
        c.created_at = now - Duration::minutes(10 - i);
        repo.update_card(&c).await.unwrap();
    }

    let cards = select_candidates(repo.as_ref(), user, deck.id, now, 2).await;
    assert_eq!(cards.len(), 2);
}

#[tokio::test]
async fn unknown_or_unowned_deck_fails_soft() {
    let repo = Arc::new(MemoryRepo::new());
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(owner, "Spanish").await.unwrap();
    repo.add_card(owner, deck.id, "q", "a").await.unwrap();

    assert!(select_candidates(repo.as_ref(), owner, Uuid::new_v4(), now, 20)
        .await
        .is_empty());
    assert!(select_candidates(repo.as_ref(), stranger, deck.id, now, 20)
        .await
        .is_empty());
}

#[tokio::test]
async fn soft_deleted_deck_is_invisible_to_selection() {
    let repo = Arc::new(MemoryRepo::new());
    let user = Uuid::new_v4();
    let now = midday();
    let deck = repo.create_deck(user, "Spanish").await.unwrap();
    repo.add_card(user, deck.id, "q", "a").await.unwrap();

    repo.delete_deck(user, deck.id).await.unwrap();

    assert!(select_candidates(repo.as_ref(), user, deck.id, now, 20)
        .await
        .is_empty());
    assert!(repo.list_cards(user, Some(deck.id)).await.unwrap().is_empty());
}

#[tokio::test]
async fn user_scoping_hides_foreign_rows() {
    let repo = Arc::new(MemoryRepo::new());
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let deck = repo.create_deck(owner, "Spanish").await.unwrap();
    let card = repo.add_card(owner, deck.id, "q", "a").await.unwrap();

    assert!(repo.get_card(stranger, card.id).await.is_err());
    assert!(repo.get_deck(stranger, deck.id).await.is_err());
    assert!(repo
        .add_card(stranger, deck.id, "q", "a")
        .await
        .is_err());
}

fn log_at(card_id: Uuid, user_id: Uuid, rating: Rating, at: DateTime<Utc>) -> ReviewLog {
    ReviewLog {
        id: Uuid::new_v4(),
        card_id,
        user_id,
        rating,
        state: CardState::Review,
        stability: 3.0,
        difficulty: 5.0,
        elapsed_days: 1.0,
        scheduled_days: 3.0,
        last_interval: 1.0,
        reviewed_at: at,
        deleted_at: None,
    }
}

#[test]
fn activity_buckets_by_utc_day() {
    let card = Uuid::new_v4();
    let user = Uuid::new_v4();
    let now = midday();

    let logs = vec![
        log_at(card, user, Rating::Good, now - Duration::days(2)),
        log_at(card, user, Rating::Again, now - Duration::days(1)),
        log_at(card, user, Rating::Easy, now - Duration::days(1)),
        log_at(card, user, Rating::Good, now),
    ];

    let summary = summarize(&logs);
    assert_eq!(summary.totals.total, 4);
    assert_eq!(summary.totals.again, 1);
    assert_eq!(summary.per_day.len(), 3);
    assert_eq!(
        summary.per_day[&(now - Duration::days(1)).date_naive()].total,
        2
    );
    assert!(summary.totals.retention() > 0.7);

    assert_eq!(daily_streak(&logs, now.date_naive()), 3);
    assert_eq!(
        daily_streak(&logs, (now + Duration::days(1)).date_naive()),
        0
    );
}
