use crate::api::sessions::AppState;
use crate::error::{AppError, Result};
use crate::services::SessionHolder;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use std::sync::Arc;
use uuid::Uuid;

/// The session named by the `:id` path segment. Looking it up also counts as
/// activity for the idle timeout.
pub struct CurrentSession {
    pub id: Uuid,
    pub holder: Arc<SessionHolder>,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;

        let holder = state.sessions.get(id).await?;

        Ok(CurrentSession { id, holder })
    }
}
