use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppJson};
use crate::models::Show;
use crate::services::reservation::BookingOutcome;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/shows", get(list_shows))
        .route("/shows/book", post(book_seats))
        .route("/shows/{id}", get(get_show))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowResponse {
    #[serde(flatten)]
    pub show: Show,
    pub available_seats: i32,
}

impl From<Show> for ShowResponse {
    fn from(show: Show) -> Self {
        let available_seats = show.available_seats();
        Self { show, available_seats }
    }
}

/* ---------- SHOWS ---------- */

// GET /api/shows
async fn list_shows(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    // Поколение читается до хранилища
    let generation = state.cache.generation().await;
    let cached = match generation {
        Some(generation) => state.cache.get_shows(generation).await,
        None => None,
    };

    let shows = match cached {
        Some(shows) => shows,
        None => {
            let shows = state.shows.list().await?;
            if let Some(generation) = generation {
                state.cache.save_shows(generation, &shows).await;
            }
            shows
        }
    };

    let payload: Vec<ShowResponse> = shows.into_iter().map(ShowResponse::from).collect();
    Ok((StatusCode::OK, Json(payload)))
}

// GET /api/shows/{id}
async fn get_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    // Некорректный id не может ссылаться на шоу
    let id = Uuid::parse_str(&id).map_err(|_| AppError::NotFound)?;

    let generation = state.cache.generation().await;
    if let Some(generation) = generation {
        if let Some(show) = state.cache.get_show(generation, id).await {
            return Ok((StatusCode::OK, Json(ShowResponse::from(show))));
        }
    }

    let show = state.shows.find(id).await?.ok_or(AppError::NotFound)?;
    if let Some(generation) = generation {
        state.cache.save_show(generation, &show).await;
    }

    Ok((StatusCode::OK, Json(ShowResponse::from(show))))
}

/* ---------- BOOKING ---------- */

// POST /api/shows/book
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookSeatsRequest {
    show_id: String,
    seats: Vec<i32>,
}

async fn book_seats(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<BookSeatsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let show_id = Uuid::parse_str(&req.show_id)
        .map_err(|_| AppError::BadRequest(format!("Invalid show id {:?}", req.show_id)))?;

    let outcome = state.reservations.book_seats(show_id, &req.seats).await?;

    let response = match outcome {
        BookingOutcome::Confirmed { booking_id } => {
            state.cache.invalidate_show(show_id).await;
            (
                StatusCode::OK,
                Json(json!({
                    "message": "Booking Successful",
                    "bookingId": booking_id,
                    "status": outcome.status(),
                })),
            )
        }
        BookingOutcome::Conflict { .. } => (
            StatusCode::CONFLICT,
            Json(json!({
                "message": "One or more seats are already booked. Please try again.",
                "status": outcome.status(),
            })),
        ),
    };

    Ok(response)
}
