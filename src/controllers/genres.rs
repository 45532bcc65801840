use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::error::{is_foreign_key_violation, is_unique_violation, ApiError};
use crate::models::Genre;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/genres", get(list_genres).post(create_genre))
        .route(
            "/genres/{id}",
            get(get_genre).put(update_genre).delete(delete_genre),
        )
}

#[derive(Debug, Deserialize, Validate)]
struct GenrePayload {
    #[validate(length(min = 1, max = 255))]
    name: String,
}

async fn list_genres(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let genres = sqlx::query_as::<_, Genre>("SELECT id, name FROM genres ORDER BY id")
        .fetch_all(&state.db.pool)
        .await?;

    Ok(Json(genres))
}

async fn create_genre(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenrePayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let genre =
        sqlx::query_as::<_, Genre>("INSERT INTO genres (name) VALUES ($1) RETURNING id, name")
            .bind(&payload.name)
            .fetch_one(&state.db.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ApiError::Conflict(format!("genre \"{}\" already exists", payload.name))
                } else {
                    e.into()
                }
            })?;

    Ok((StatusCode::CREATED, Json(genre)))
}

async fn get_genre(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let genre = sqlx::query_as::<_, Genre>("SELECT id, name FROM genres WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or(ApiError::NotFound("genre"))?;

    Ok(Json(genre))
}

async fn update_genre(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<GenrePayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let genre = sqlx::query_as::<_, Genre>(
        "UPDATE genres SET name = $2 WHERE id = $1 RETURNING id, name",
    )
    .bind(id)
    .bind(&payload.name)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::Conflict(format!("genre \"{}\" already exists", payload.name))
        } else {
            ApiError::from(e)
        }
    })?
    .ok_or(ApiError::NotFound("genre"))?;

    Ok(Json(genre))
}

async fn delete_genre(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let result = sqlx::query("DELETE FROM genres WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                ApiError::Conflict("genre is still referenced by movies".to_string())
            } else {
                ApiError::from(e)
            }
        })?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("genre"));
    }

    Ok(StatusCode::NO_CONTENT)
}
