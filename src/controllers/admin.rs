use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::controllers::shows::ShowResponse;
use crate::error::{AppError, AppJson};
use crate::models::NewShow;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/admin/shows", post(create_show))
}

// POST /api/admin/shows
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateShowRequest {
    #[validate(length(min = 1, max = 200))]
    name: String,
    start_time: DateTime<Utc>,
    #[validate(range(min = 1, max = 10000))]
    total_seats: i32,
}

async fn create_show(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateShowRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("name must not be blank".to_string()));
    }

    let show = state
        .shows
        .create(NewShow {
            name,
            start_time: req.start_time,
            total_seats: req.total_seats,
        })
        .await?;

    state.cache.invalidate_show(show.id).await;
    tracing::info!("Created show {} '{}' with {} seats", show.id, show.name, show.total_seats);

    Ok((StatusCode::CREATED, Json(ShowResponse::from(show))))
}
