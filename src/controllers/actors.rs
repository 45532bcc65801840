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
use crate::models::Actor;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/actors", get(list_actors).post(create_actor))
        .route(
            "/actors/{id}",
            get(get_actor).put(update_actor).delete(delete_actor),
        )
}

#[derive(Debug, Deserialize, Validate)]
struct ActorPayload {
    #[validate(length(min = 1, max = 255))]
    first_name: String,
    #[validate(length(min = 1, max = 255))]
    last_name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ActorResponse {
    id: i64,
    first_name: String,
    last_name: String,
    full_name: String,
}

impl From<Actor> for ActorResponse {
    fn from(actor: Actor) -> Self {
        let full_name = actor.full_name();
        ActorResponse {
            id: actor.id,
            first_name: actor.first_name,
            last_name: actor.last_name,
            full_name,
        }
    }
}

async fn list_actors(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let actors =
        sqlx::query_as::<_, Actor>("SELECT id, first_name, last_name FROM actors ORDER BY id")
            .fetch_all(&state.db.pool)
            .await?;

    let payload: Vec<ActorResponse> = actors.into_iter().map(ActorResponse::from).collect();
    Ok(Json(payload))
}

async fn create_actor(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ActorPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let actor = sqlx::query_as::<_, Actor>(
        "INSERT INTO actors (first_name, last_name) VALUES ($1, $2)
         RETURNING id, first_name, last_name",
    )
    .bind(&payload.first_name)
    .bind(&payload.last_name)
    .fetch_one(&state.db.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(ActorResponse::from(actor))))
}

async fn get_actor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor =
        sqlx::query_as::<_, Actor>("SELECT id, first_name, last_name FROM actors WHERE id = $1")
            .bind(id)
            .fetch_optional(&state.db.pool)
            .await?
            .ok_or(ApiError::NotFound("actor"))?;

    Ok(Json(ActorResponse::from(actor)))
}

async fn update_actor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<ActorPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let actor = sqlx::query_as::<_, Actor>(
        "UPDATE actors SET first_name = $2, last_name = $3 WHERE id = $1
         RETURNING id, first_name, last_name",
    )
    .bind(id)
    .bind(&payload.first_name)
    .bind(&payload.last_name)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or(ApiError::NotFound("actor"))?;

    Ok(Json(ActorResponse::from(actor)))
}

async fn delete_actor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let result = sqlx::query("DELETE FROM actors WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                ApiError::Conflict("actor is still referenced by movies".to_string())
            } else {
                ApiError::from(e)
            }
        })?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("actor"));
    }

    Ok(StatusCode::NO_CONTENT)
}
