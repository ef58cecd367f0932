//! HTTP handlers

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::connect_info::PeerAddr;
use super::error::ApiError;
use super::AppState;
use crate::polls::model::PollId;
use crate::polls::{NewPoll, NewUser, Poll, PollResult, User, Vote, VoteRequest};

/// POST /votes
pub async fn cast_vote(
    State(state): State<AppState>,
    peer: PeerAddr,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Vote>), ApiError> {
    let Json(request) = body?;
    let vote = state
        .engine
        .cast_vote(request.user_id, request.poll_option_id)
        .await?;
    debug!(vote_id = vote.id, peer = %peer, "Vote acknowledged");
    Ok((StatusCode::CREATED, Json(vote)))
}

/// POST /users
pub async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<NewUser>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let Json(user) = body?;
    let user = state.engine.create_user(user).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /users
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.engine.list_users().await?))
}

/// POST /polls
pub async fn create_poll(
    State(state): State<AppState>,
    body: Result<Json<NewPoll>, JsonRejection>,
) -> Result<(StatusCode, Json<Poll>), ApiError> {
    let Json(poll) = body?;
    let poll = state.engine.create_poll(poll).await?;
    info!(poll_id = poll.id, options = poll.options.len(), "Poll created");
    Ok((StatusCode::CREATED, Json(poll)))
}

/// GET /polls
pub async fn list_polls(State(state): State<AppState>) -> Result<Json<Vec<Poll>>, ApiError> {
    Ok(Json(state.engine.list_polls().await?))
}

/// GET /polls/{id}/results
pub async fn poll_results(
    State(state): State<AppState>,
    poll_id: Result<Path<PollId>, PathRejection>,
) -> Result<Json<PollResult>, ApiError> {
    let Path(poll_id) = poll_id?;
    Ok(Json(state.engine.poll_results(poll_id).await?))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.engine.hub().registry().len(),
    }))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.engine.metrics().render(),
    )
}
