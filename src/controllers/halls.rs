use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::error::{is_foreign_key_violation, ApiError};
use crate::models::CinemaHall;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/cinema-halls", get(list_halls).post(create_hall))
        .route(
            "/cinema-halls/{id}",
            get(get_hall).put(update_hall).delete(delete_hall),
        )
}

#[derive(Debug, Deserialize, Validate)]
struct HallPayload {
    #[validate(length(min = 1, max = 255))]
    name: String,
    #[validate(range(min = 1))]
    rows: i32,
    #[validate(range(min = 1))]
    seats_in_row: i32,
}

#[derive(Debug, Serialize)]
pub(crate) struct HallResponse {
    id: i64,
    name: String,
    rows: i32,
    seats_in_row: i32,
    capacity: i64,
}

impl From<CinemaHall> for HallResponse {
    fn from(hall: CinemaHall) -> Self {
        HallResponse {
            id: hall.id,
            capacity: hall.capacity(),
            name: hall.name,
            rows: hall.rows,
            seats_in_row: hall.seats_in_row,
        }
    }
}

async fn list_halls(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let halls = sqlx::query_as::<_, CinemaHall>(
        r#"SELECT id, name, "rows", seats_in_row FROM cinema_halls ORDER BY id"#,
    )
    .fetch_all(&state.db.pool)
    .await?;

    let payload: Vec<HallResponse> = halls.into_iter().map(HallResponse::from).collect();
    Ok(Json(payload))
}

async fn create_hall(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<HallPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let hall = sqlx::query_as::<_, CinemaHall>(
        r#"INSERT INTO cinema_halls (name, "rows", seats_in_row) VALUES ($1, $2, $3)
           RETURNING id, name, "rows", seats_in_row"#,
    )
    .bind(&payload.name)
    .bind(payload.rows)
    .bind(payload.seats_in_row)
    .fetch_one(&state.db.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(HallResponse::from(hall))))
}

async fn get_hall(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let hall = sqlx::query_as::<_, CinemaHall>(
        r#"SELECT id, name, "rows", seats_in_row FROM cinema_halls WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or(ApiError::NotFound("cinema hall"))?;

    Ok(Json(HallResponse::from(hall)))
}

// Hall geometry is treated as immutable once sessions reference the hall:
// shrinking it could strand already sold tickets outside the grid.
async fn update_hall(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<HallPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let referenced = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM movie_sessions WHERE cinema_hall_id = $1)",
    )
    .bind(id)
    .fetch_one(&state.db.pool)
    .await?;

    if referenced {
        return Err(ApiError::Conflict(
            "cinema hall is referenced by sessions and cannot be modified".to_string(),
        ));
    }

    let hall = sqlx::query_as::<_, CinemaHall>(
        r#"UPDATE cinema_halls SET name = $2, "rows" = $3, seats_in_row = $4 WHERE id = $1
           RETURNING id, name, "rows", seats_in_row"#,
    )
    .bind(id)
    .bind(&payload.name)
    .bind(payload.rows)
    .bind(payload.seats_in_row)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or(ApiError::NotFound("cinema hall"))?;

    Ok(Json(HallResponse::from(hall)))
}

async fn delete_hall(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let result = sqlx::query("DELETE FROM cinema_halls WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                ApiError::Conflict("cinema hall is still referenced by sessions".to_string())
            } else {
                ApiError::from(e)
            }
        })?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("cinema hall"));
    }

    Ok(StatusCode::NO_CONTENT)
}
