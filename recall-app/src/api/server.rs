use axum::{
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::api::routes::{list_decks, post_answer, preview, start_session, AppState};
use recall_core::{MemoryModel, Repository};

pub async fn run(repo: Arc<dyn Repository>, addr: SocketAddr) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        repo,
        scheduler: Arc::new(MemoryModel::new()),
    });

    let app = Router::new()
        .route("/decks", get(list_decks))
        .route("/session", get(start_session))
        .route("/preview", get(preview))
        .route("/answer", post(post_answer))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    tracing::info!(%addr, "api listening");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
