use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use validator::Validate;

use crate::controllers::actors::ActorResponse;
use crate::error::{is_foreign_key_violation, ApiError};
use crate::models::{Actor, Genre, Movie};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/movies", get(list_movies).post(create_movie))
        .route(
            "/movies/{id}",
            get(get_movie).put(update_movie).delete(delete_movie),
        )
}

/* ---------- helpers ---------- */

// Comma-separated id list from a query parameter; non-numeric entries are
// silently dropped.
fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .collect()
}

const MOVIE_LIST_SELECT: &str = r#"
    SELECT m.id, m.title, m.description, m.duration,
           COALESCE(array_agg(DISTINCT g.name) FILTER (WHERE g.id IS NOT NULL), '{}') AS genres,
           COALESCE(array_agg(DISTINCT a.first_name || ' ' || a.last_name)
                    FILTER (WHERE a.id IS NOT NULL), '{}') AS actors
    FROM movies m
    LEFT JOIN movie_genres mg ON mg.movie_id = m.id
    LEFT JOIN genres g ON g.id = mg.genre_id
    LEFT JOIN movie_actors ma ON ma.movie_id = m.id
    LEFT JOIN actors a ON a.id = ma.actor_id
"#;

type MovieListRow = (i64, String, String, i32, Vec<String>, Vec<String>);

#[derive(Debug, Serialize)]
pub(crate) struct MovieListItem {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub duration: i32,
    pub genres: Vec<String>,
    pub actors: Vec<String>,
}

impl From<MovieListRow> for MovieListItem {
    fn from((id, title, description, duration, genres, actors): MovieListRow) -> Self {
        MovieListItem {
            id,
            title,
            description,
            duration,
            genres,
            actors,
        }
    }
}

// Also used by the session detail view.
pub(crate) async fn fetch_movie_list_item(
    pool: &PgPool,
    movie_id: i64,
) -> Result<Option<MovieListItem>, sqlx::Error> {
    let q = format!("{} WHERE m.id = $1 GROUP BY m.id", MOVIE_LIST_SELECT);
    let row = sqlx::query_as::<_, MovieListRow>(&q)
        .bind(movie_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(MovieListItem::from))
}

async fn replace_movie_links(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    movie_id: i64,
    genres: &[i64],
    actors: &[i64],
) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM movie_genres WHERE movie_id = $1")
        .bind(movie_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM movie_actors WHERE movie_id = $1")
        .bind(movie_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        "INSERT INTO movie_genres (movie_id, genre_id)
         SELECT $1, g FROM unnest($2::BIGINT[]) AS g
         ON CONFLICT DO NOTHING",
    )
    .bind(movie_id)
    .bind(genres)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            ApiError::BadRequest("unknown genre id".to_string())
        } else {
            ApiError::from(e)
        }
    })?;

    sqlx::query(
        "INSERT INTO movie_actors (movie_id, actor_id)
         SELECT $1, a FROM unnest($2::BIGINT[]) AS a
         ON CONFLICT DO NOTHING",
    )
    .bind(movie_id)
    .bind(actors)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            ApiError::BadRequest("unknown actor id".to_string())
        } else {
            ApiError::from(e)
        }
    })?;

    Ok(())
}

/* ---------- MOVIES ---------- */

#[derive(Debug, Deserialize)]
struct MoviesQuery {
    title: Option<String>,
    genres: Option<String>,
    actors: Option<String>,
}

async fn list_movies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MoviesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let genre_ids = params.genres.as_deref().map(parse_id_list);
    let actor_ids = params.actors.as_deref().map(parse_id_list);

    let mut q = String::from(MOVIE_LIST_SELECT);
    let mut filters: Vec<String> = Vec::new();
    let mut bind_idx = 1;

    if params.title.is_some() {
        filters.push(format!("m.title ILIKE ${}", bind_idx));
        bind_idx += 1;
    }
    if genre_ids.is_some() {
        filters.push(format!(
            "m.id IN (SELECT movie_id FROM movie_genres WHERE genre_id = ANY(${}))",
            bind_idx
        ));
        bind_idx += 1;
    }
    if actor_ids.is_some() {
        filters.push(format!(
            "m.id IN (SELECT movie_id FROM movie_actors WHERE actor_id = ANY(${}))",
            bind_idx
        ));
    }

    if !filters.is_empty() {
        q.push_str(" WHERE ");
        q.push_str(&filters.join(" AND "));
    }
    q.push_str(" GROUP BY m.id ORDER BY m.id");

    let mut dbq = sqlx::query_as::<_, MovieListRow>(&q);
    if let Some(title) = &params.title {
        dbq = dbq.bind(format!("%{}%", title));
    }
    if let Some(ids) = &genre_ids {
        dbq = dbq.bind(ids);
    }
    if let Some(ids) = &actor_ids {
        dbq = dbq.bind(ids);
    }

    let rows = dbq.fetch_all(&state.db.pool).await?;
    let payload: Vec<MovieListItem> = rows.into_iter().map(MovieListItem::from).collect();

    Ok(Json(payload))
}

#[derive(Debug, Deserialize, Validate)]
struct MoviePayload {
    #[validate(length(min = 1, max = 255))]
    title: String,
    #[serde(default)]
    description: String,
    #[validate(range(min = 1))]
    duration: i32,
    #[serde(default)]
    genres: Vec<i64>,
    #[serde(default)]
    actors: Vec<i64>,
}

// Create/update echo back the linked ids, the list and detail views do the
// name resolution.
#[derive(Debug, Serialize)]
struct MovieWriteResponse {
    id: i64,
    title: String,
    description: String,
    duration: i32,
    genres: Vec<i64>,
    actors: Vec<i64>,
}

async fn create_movie(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MoviePayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut tx = state.db.pool.begin().await?;

    let movie = sqlx::query_as::<_, Movie>(
        "INSERT INTO movies (title, description, duration) VALUES ($1, $2, $3)
         RETURNING id, title, description, duration",
    )
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.duration)
    .fetch_one(&mut *tx)
    .await?;

    replace_movie_links(&mut tx, movie.id, &payload.genres, &payload.actors).await?;

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(MovieWriteResponse {
            id: movie.id,
            title: movie.title,
            description: movie.description,
            duration: movie.duration,
            genres: payload.genres,
            actors: payload.actors,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct MovieDetailResponse {
    id: i64,
    title: String,
    description: String,
    duration: i32,
    genres: Vec<Genre>,
    actors: Vec<ActorResponse>,
}

async fn get_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let movie = sqlx::query_as::<_, Movie>(
        "SELECT id, title, description, duration FROM movies WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or(ApiError::NotFound("movie"))?;

    let genres_query = sqlx::query_as::<_, Genre>(
        "SELECT g.id, g.name FROM genres g
         JOIN movie_genres mg ON mg.genre_id = g.id
         WHERE mg.movie_id = $1 ORDER BY g.id",
    )
    .bind(id)
    .fetch_all(&state.db.pool);

    let actors_query = sqlx::query_as::<_, Actor>(
        "SELECT a.id, a.first_name, a.last_name FROM actors a
         JOIN movie_actors ma ON ma.actor_id = a.id
         WHERE ma.movie_id = $1 ORDER BY a.id",
    )
    .bind(id)
    .fetch_all(&state.db.pool);

    let (genres, actors) = futures::try_join!(genres_query, actors_query)?;

    Ok(Json(MovieDetailResponse {
        id: movie.id,
        title: movie.title,
        description: movie.description,
        duration: movie.duration,
        genres,
        actors: actors.into_iter().map(ActorResponse::from).collect(),
    }))
}

async fn update_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<MoviePayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut tx = state.db.pool.begin().await?;

    let movie = sqlx::query_as::<_, Movie>(
        "UPDATE movies SET title = $2, description = $3, duration = $4 WHERE id = $1
         RETURNING id, title, description, duration",
    )
    .bind(id)
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.duration)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ApiError::NotFound("movie"))?;

    replace_movie_links(&mut tx, movie.id, &payload.genres, &payload.actors).await?;

    tx.commit().await?;

    Ok(Json(MovieWriteResponse {
        id: movie.id,
        title: movie.title,
        description: movie.description,
        duration: movie.duration,
        genres: payload.genres,
        actors: payload.actors,
    }))
}

async fn delete_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let result = sqlx::query("DELETE FROM movies WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                ApiError::Conflict("movie is still referenced by sessions".to_string())
            } else {
                ApiError::from(e)
            }
        })?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("movie"));
    }

    Ok(StatusCode::NO_CONTENT)
}
