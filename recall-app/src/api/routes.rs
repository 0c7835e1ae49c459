use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use recall_core::{
    end_of_day, select_candidates, CoreError, Repository, ReviewRecorder, Scheduler,
    DEFAULT_MAX_NEW,
};

use crate::api::dto::{AnswerIn, AnswerOut, CardOut, DeckOut, PreviewOut};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub scheduler: Arc<dyn Scheduler>,
}

fn user_or_local(user: Option<Uuid>) -> Uuid {
    user.unwrap_or(Uuid::nil())
}

#[derive(Deserialize)]
pub struct UserQuery {
    user: Option<Uuid>,
}

pub async fn list_decks(
    State(st): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<DeckOut>>, StatusCode> {
    let mut decks = st
        .repo
        .list_decks(user_or_local(q.user))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    decks.sort_by_key(|d| d.created_at);
    Ok(Json(
        decks
            .into_iter()
            .map(|d| DeckOut {
                id: d.id,
                name: d.name,
                created_at: d.created_at,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct SessionQuery {
    user: Option<Uuid>,
    deck: Uuid,
    max_new: Option<usize>,
    /// Session start instant; defaults to the server clock.
    now: Option<DateTime<Utc>>,
}

/// startSession: the ordered candidate list for one study session.
pub async fn start_session(
    State(st): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Json<Vec<CardOut>> {
    let now = q.now.unwrap_or_else(Utc::now);
    let cards = select_candidates(
        st.repo.as_ref(),
        user_or_local(q.user),
        q.deck,
        now,
        q.max_new.unwrap_or(DEFAULT_MAX_NEW),
    )
    .await;
    Json(cards.into_iter().map(CardOut::from).collect())
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    user: Option<Uuid>,
    card: Uuid,
    now: Option<DateTime<Utc>>,
}

/// Time-until-due per rating for one card, without committing anything.
pub async fn preview(
    State(st): State<Arc<AppState>>,
    Query(q): Query<PreviewQuery>,
) -> Result<Json<PreviewOut>, StatusCode> {
    let now = q.now.unwrap_or_else(Utc::now);
    let card = st
        .repo
        .get_card(user_or_local(q.user), q.card)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let p = st
        .scheduler
        .preview(&card, now)
        .await
        .map_err(|_| StatusCode::BAD_GATEWAY)?;
    Ok(Json(PreviewOut {
        again: p.again,
        hard: p.hard,
        good: p.good,
        easy: p.easy,
    }))
}

pub async fn post_answer(
    State(st): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(body): Json<AnswerIn>,
) -> Result<Json<AnswerOut>, StatusCode> {
    let now = body.now.unwrap_or_else(Utc::now);
    let user = user_or_local(q.user);
    let card = st
        .repo
        .get_card(user, body.card_id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let update = st
        .scheduler
        .commit(&card, body.rating, now)
        .await
        .map_err(|e| match e {
            CoreError::SchedulerUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })?;

    ReviewRecorder::new(st.repo.clone())
        .record(&update, body.rating, now)
        .await
        .map_err(|e| match e {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })?;

    let requeued = update.card.due <= end_of_day(now);
    Ok(Json(AnswerOut {
        card: CardOut::from(update.card),
        requeued,
    }))
}
