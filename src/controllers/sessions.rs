use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::controllers::halls::HallResponse;
use crate::controllers::movies::{fetch_movie_list_item, MovieListItem};
use crate::error::{is_foreign_key_violation, ApiError};
use crate::models::{CinemaHall, MovieSession};
use crate::services::booking::{self, TakenPlace};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/movie-sessions", get(list_sessions).post(create_session))
        .route(
            "/movie-sessions/{id}",
            get(get_session).put(update_session).delete(delete_session),
        )
}

/* ---------- MOVIE SESSIONS ---------- */

#[derive(Debug, Deserialize)]
struct SessionsQuery {
    date: Option<String>,
    movie: Option<i64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub(crate) struct SessionListItem {
    pub(crate) id: i64,
    pub(crate) show_time: NaiveDateTime,
    pub(crate) movie_title: String,
    pub(crate) cinema_hall_name: String,
    pub(crate) cinema_hall_capacity: i64,
    pub(crate) tickets_available: i64,
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SessionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    // An unparseable date filter matches nothing.
    let date = match params.date.as_deref() {
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(d) => Some(d),
            Err(_) => return Ok(Json(Vec::<SessionListItem>::new())),
        },
        None => None,
    };

    let mut q = String::from(
        r#"SELECT ms.id, ms.show_time,
                  m.title AS movie_title,
                  h.name AS cinema_hall_name,
                  h."rows"::BIGINT * h.seats_in_row AS cinema_hall_capacity,
                  h."rows"::BIGINT * h.seats_in_row - COUNT(t.id) AS tickets_available
           FROM movie_sessions ms
           JOIN movies m ON m.id = ms.movie_id
           JOIN cinema_halls h ON h.id = ms.cinema_hall_id
           LEFT JOIN tickets t ON t.movie_session_id = ms.id"#,
    );

    let mut filters: Vec<String> = Vec::new();
    let mut bind_idx = 1;
    if date.is_some() {
        filters.push(format!("ms.show_time::date = ${}", bind_idx));
        bind_idx += 1;
    }
    if params.movie.is_some() {
        filters.push(format!("ms.movie_id = ${}", bind_idx));
    }
    if !filters.is_empty() {
        q.push_str(" WHERE ");
        q.push_str(&filters.join(" AND "));
    }
    q.push_str(
        r#" GROUP BY ms.id, ms.show_time, m.title, h.name, h."rows", h.seats_in_row
            ORDER BY ms.show_time, ms.id"#,
    );

    let mut dbq = sqlx::query_as::<_, SessionListItem>(&q);
    if let Some(d) = date {
        dbq = dbq.bind(d);
    }
    if let Some(movie_id) = params.movie {
        dbq = dbq.bind(movie_id);
    }

    let sessions = dbq.fetch_all(&state.db.pool).await?;
    Ok(Json(sessions))
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    #[serde(rename = "movie")]
    movie_id: i64,
    #[serde(rename = "cinema_hall")]
    cinema_hall_id: i64,
    show_time: NaiveDateTime,
}

#[derive(Debug, Serialize)]
struct SessionWriteResponse {
    id: i64,
    show_time: NaiveDateTime,
    movie: i64,
    cinema_hall: i64,
}

impl From<MovieSession> for SessionWriteResponse {
    fn from(session: MovieSession) -> Self {
        SessionWriteResponse {
            id: session.id,
            show_time: session.show_time,
            movie: session.movie_id,
            cinema_hall: session.cinema_hall_id,
        }
    }
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let session = sqlx::query_as::<_, MovieSession>(
        "INSERT INTO movie_sessions (movie_id, cinema_hall_id, show_time)
         VALUES ($1, $2, $3)
         RETURNING id, movie_id, cinema_hall_id, show_time",
    )
    .bind(payload.movie_id)
    .bind(payload.cinema_hall_id)
    .bind(payload.show_time)
    .fetch_one(&state.db.pool)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            ApiError::BadRequest("unknown movie or cinema hall".to_string())
        } else {
            ApiError::from(e)
        }
    })?;

    Ok((StatusCode::CREATED, Json(SessionWriteResponse::from(session))))
}

#[derive(Debug, Serialize)]
struct SessionDetailResponse {
    id: i64,
    show_time: NaiveDateTime,
    movie: MovieListItem,
    cinema_hall: HallResponse,
    taken_places: Vec<TakenPlace>,
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let session = sqlx::query_as::<_, MovieSession>(
        "SELECT id, movie_id, cinema_hall_id, show_time FROM movie_sessions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or(ApiError::NotFound("movie session"))?;

    let hall_query = sqlx::query_as::<_, CinemaHall>(
        r#"SELECT id, name, "rows", seats_in_row FROM cinema_halls WHERE id = $1"#,
    )
    .bind(session.cinema_hall_id)
    .fetch_one(&state.db.pool);

    let (movie, hall, taken_places) = futures::try_join!(
        fetch_movie_list_item(&state.db.pool, session.movie_id),
        hall_query,
        booking::taken_places(&state.db.pool, session.id),
    )?;

    let movie = movie.ok_or(ApiError::NotFound("movie"))?;

    Ok(Json(SessionDetailResponse {
        id: session.id,
        show_time: session.show_time,
        movie,
        cinema_hall: HallResponse::from(hall),
        taken_places,
    }))
}

async fn update_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<SessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let session = sqlx::query_as::<_, MovieSession>(
        "UPDATE movie_sessions SET movie_id = $2, cinema_hall_id = $3, show_time = $4
         WHERE id = $1
         RETURNING id, movie_id, cinema_hall_id, show_time",
    )
    .bind(id)
    .bind(payload.movie_id)
    .bind(payload.cinema_hall_id)
    .bind(payload.show_time)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            ApiError::BadRequest("unknown movie or cinema hall".to_string())
        } else {
            ApiError::from(e)
        }
    })?
    .ok_or(ApiError::NotFound("movie session"))?;

    Ok(Json(SessionWriteResponse::from(session)))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let result = sqlx::query("DELETE FROM movie_sessions WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                ApiError::Conflict("movie session has sold tickets".to_string())
            } else {
                ApiError::from(e)
            }
        })?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("movie session"));
    }

    Ok(StatusCode::NO_CONTENT)
}
