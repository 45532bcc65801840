use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::sync::Arc;
use tracing::info;

use crate::controllers::sessions::SessionListItem;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::services::booking::{self, TicketRequest};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/orders", get(list_orders).post(create_order))
}

/* ---------- ORDERS ---------- */

// POST /api/orders
#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    tickets: Vec<TicketRequest>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = booking::create_order(&state.db.pool, user.user_id, &req.tickets).await?;

    info!(
        "user {} placed order {} with {} tickets",
        user.user_id,
        order.id,
        order.tickets.len()
    );

    Ok((StatusCode::CREATED, Json(order)))
}

// GET /api/orders
#[derive(Debug, Serialize)]
struct OrderTicket {
    id: i64,
    row: i32,
    seat: i32,
    movie_session: SessionListItem,
}

#[derive(Debug, Serialize)]
struct OrderResponse {
    id: i64,
    created_at: NaiveDateTime,
    tickets: Vec<OrderTicket>,
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let rows = sqlx::query(
        r#"
        SELECT o.id AS order_id, o.created_at,
               t.id AS ticket_id, t."row", t.seat,
               ms.id AS session_id, ms.show_time,
               m.title AS movie_title,
               h.name AS cinema_hall_name,
               h."rows"::BIGINT * h.seats_in_row AS cinema_hall_capacity,
               h."rows"::BIGINT * h.seats_in_row
                   - (SELECT COUNT(*) FROM tickets ts WHERE ts.movie_session_id = ms.id)
                   AS tickets_available
        FROM orders o
        JOIN tickets t ON t.order_id = o.id
        JOIN movie_sessions ms ON ms.id = t.movie_session_id
        JOIN movies m ON m.id = ms.movie_id
        JOIN cinema_halls h ON h.id = ms.cinema_hall_id
        WHERE o.user_id = $1
        ORDER BY o.created_at DESC, o.id DESC, t.id
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.db.pool)
    .await?;

    // Rows arrive sorted by order, so grouping is a single pass.
    let mut resp: Vec<OrderResponse> = Vec::new();
    for r in rows {
        let order_id: i64 = r.get("order_id");
        if resp.last().map(|o| o.id) != Some(order_id) {
            resp.push(OrderResponse {
                id: order_id,
                created_at: r.get("created_at"),
                tickets: Vec::new(),
            });
        }

        let ticket = OrderTicket {
            id: r.get("ticket_id"),
            row: r.get("row"),
            seat: r.get("seat"),
            movie_session: SessionListItem {
                id: r.get("session_id"),
                show_time: r.get("show_time"),
                movie_title: r.get("movie_title"),
                cinema_hall_name: r.get("cinema_hall_name"),
                cinema_hall_capacity: r.get("cinema_hall_capacity"),
                tickets_available: r.get("tickets_available"),
            },
        };
        if let Some(order) = resp.last_mut() {
            order.tickets.push(ticket);
        }
    }

    Ok(Json(resp))
}
