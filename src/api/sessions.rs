use crate::api::middleware::CurrentSession;
use crate::error::{self, AppError};
use crate::models::{Challenge, ChallengeMode, GameResult};
use crate::services::session::{ResultsView, SessionView};
use crate::services::SessionManager;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

pub struct AppState {
    pub sessions: SessionManager,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TokenRequest {
    #[validate(length(min = 1, max = 4096))]
    pub access_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SelectPlaylistRequest {
    #[validate(length(min = 1, max = 64))]
    pub playlist_id: String,
    #[validate(length(min = 1, max = 65536))]
    pub challenge_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GuessRequest {
    #[validate(length(max = 200))]
    pub guess: String,
    #[validate(range(max = 3600000))]
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub session: SessionView,
}

#[derive(Debug, Serialize)]
pub struct GuessResponse {
    pub result: GameResult,
    pub session: SessionView,
}

#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub code: String,
}

pub fn session_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/token", put(update_token))
        .route("/sessions/:id/playlist", post(select_playlist))
        .route("/sessions/:id/guess", post(submit_guess))
        .route("/sessions/:id/skip", post(skip_track))
        .route("/sessions/:id/new-game", post(new_game))
        .route("/sessions/:id/results", get(get_results))
        .route("/sessions/:id/challenge", get(share_challenge))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> error::Result<(StatusCode, Json<CreateSessionResponse>)> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let (session_id, holder) = state.sessions.create_session(&req.access_token).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            session: holder.snapshot().await,
        }),
    ))
}

async fn get_session(session: CurrentSession) -> Json<SessionView> {
    Json(session.holder.snapshot().await)
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
) -> error::Result<StatusCode> {
    state.sessions.remove(session.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_token(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    Json(req): Json<TokenRequest>,
) -> error::Result<Json<SessionView>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    state.sessions.update_token(session.id, &req.access_token).await?;
    Ok(Json(session.holder.snapshot().await))
}

async fn select_playlist(
    session: CurrentSession,
    Json(req): Json<SelectPlaylistRequest>,
) -> error::Result<Json<SessionView>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let challenge = match req.challenge_code.as_deref() {
        Some(code) => ChallengeMode::Challenge(Challenge::from_code(code)?),
        None => ChallengeMode::Solo,
    };

    tracing::debug!(
        "Session {} selecting playlist {} (challenge: {})",
        session.id,
        req.playlist_id,
        challenge.is_challenge()
    );

    let view = session.holder.select_playlist(&req.playlist_id, challenge).await?;
    Ok(Json(view))
}

async fn submit_guess(
    session: CurrentSession,
    Json(req): Json<GuessRequest>,
) -> error::Result<Json<GuessResponse>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let result = session.holder.submit_guess(&req.guess, req.elapsed_ms).await?;

    Ok(Json(GuessResponse {
        result,
        session: session.holder.snapshot().await,
    }))
}

async fn skip_track(session: CurrentSession) -> error::Result<Json<SessionView>> {
    Ok(Json(session.holder.play_again().await?))
}

async fn new_game(session: CurrentSession) -> Json<SessionView> {
    Json(session.holder.new_game().await)
}

async fn get_results(session: CurrentSession) -> Json<ResultsView> {
    Json(session.holder.results().await)
}

async fn share_challenge(session: CurrentSession) -> error::Result<Json<ChallengeResponse>> {
    let code = session.holder.share_challenge().await?;
    Ok(Json(ChallengeResponse { code }))
}
