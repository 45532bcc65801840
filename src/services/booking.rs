//! booking.rs
//!
//! Order placement: every ticket in a request is validated against its
//! session's hall geometry and current availability, then the order and all
//! tickets are committed in one transaction. The UNIQUE constraint on
//! (movie_session_id, "row", seat) is the source of truth for seat
//! uniqueness; the in-transaction availability check is a fast path that
//! produces a precise rejection before the insert is attempted.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::models::Ticket;

/// One requested seat, as it arrives on the wire.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TicketRequest {
    #[serde(rename = "movie_session")]
    pub movie_session_id: i64,
    pub row: i32,
    pub seat: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatField {
    Row,
    Seat,
}

impl fmt::Display for SeatField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeatField::Row => f.write_str("row"),
            SeatField::Seat => f.write_str("seat"),
        }
    }
}

/// Why an order was rejected. Validation variants carry the 0-based index
/// of the offending ticket request.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("order must contain at least one ticket")]
    EmptyOrder,

    #[error("ticket {index}: movie session {session_id} does not exist")]
    SessionNotFound { index: usize, session_id: i64 },

    #[error("ticket {index}: {field} {value} is out of range (1 to {bound})")]
    OutOfRange {
        index: usize,
        field: SeatField,
        value: i32,
        bound: i32,
    },

    #[error("ticket {index}: row {row}, seat {seat} is already taken for session {session_id}")]
    SeatTaken {
        index: usize,
        session_id: i64,
        row: i32,
        seat: i32,
    },

    #[error("storage failure")]
    Storage(#[from] sqlx::Error),
}

/// Hall geometry a seat is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HallGeometry {
    pub rows: i32,
    pub seats_in_row: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatOutOfRange {
    pub field: SeatField,
    pub value: i32,
    pub bound: i32,
}

/// Checks a (row, seat) pair against hall geometry. Row is checked first.
pub fn validate_seat(hall: HallGeometry, row: i32, seat: i32) -> Result<(), SeatOutOfRange> {
    if row < 1 || row > hall.rows {
        return Err(SeatOutOfRange {
            field: SeatField::Row,
            value: row,
            bound: hall.rows,
        });
    }
    if seat < 1 || seat > hall.seats_in_row {
        return Err(SeatOutOfRange {
            field: SeatField::Seat,
            value: seat,
            bound: hall.seats_in_row,
        });
    }
    Ok(())
}

/// Whether (session, row, seat) already belongs to a persisted ticket.
/// Runs on the order transaction so the check and the later insert share
/// one isolation scope.
pub async fn is_taken(
    tx: &mut Transaction<'_, Postgres>,
    session_id: i64,
    row: i32,
    seat: i32,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"SELECT EXISTS(
             SELECT 1 FROM tickets
             WHERE movie_session_id = $1 AND "row" = $2 AND seat = $3
           )"#,
    )
    .bind(session_id)
    .bind(row)
    .bind(seat)
    .fetch_one(&mut **tx)
    .await
}

fn seat_already_staged(staged: &[(i64, i32, i32)], session_id: i64, row: i32, seat: i32) -> bool {
    staged
        .iter()
        .any(|&(s, r, c)| s == session_id && r == row && c == seat)
}

async fn session_geometry(
    tx: &mut Transaction<'_, Postgres>,
    session_id: i64,
) -> Result<Option<HallGeometry>, sqlx::Error> {
    let row = sqlx::query_as::<_, (i32, i32)>(
        r#"SELECT h."rows", h.seats_in_row
           FROM movie_sessions ms
           JOIN cinema_halls h ON h.id = ms.cinema_hall_id
           WHERE ms.id = $1"#,
    )
    .bind(session_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(|(rows, seats_in_row)| HallGeometry { rows, seats_in_row }))
}

/// A committed order, fully materialized for the response.
#[derive(Debug, Serialize)]
pub struct PlacedOrder {
    pub id: i64,
    pub created_at: NaiveDateTime,
    pub tickets: Vec<Ticket>,
}

/// Creates an order with all requested tickets, or nothing at all.
///
/// The whole validate-then-insert sequence runs in a single transaction.
/// The first rejection wins and rolls everything back; storage errors
/// propagate opaquely and are never retried here.
pub async fn create_order(
    pool: &PgPool,
    user_id: i64,
    requests: &[TicketRequest],
) -> Result<PlacedOrder, BookingError> {
    // Rejected before any transaction is opened.
    if requests.is_empty() {
        return Err(BookingError::EmptyOrder);
    }

    let mut tx = pool.begin().await?;

    match place_order(&mut tx, user_id, requests).await {
        Ok(order) => {
            tx.commit().await?;
            Ok(order)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("order rollback failed: {:?}", rollback_err);
            }
            Err(err)
        }
    }
}

async fn place_order(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    requests: &[TicketRequest],
) -> Result<PlacedOrder, BookingError> {
    let mut staged: Vec<(i64, i32, i32)> = Vec::with_capacity(requests.len());

    for (index, req) in requests.iter().enumerate() {
        // Each ticket is validated against its own session's hall.
        let geometry = session_geometry(tx, req.movie_session_id)
            .await?
            .ok_or(BookingError::SessionNotFound {
                index,
                session_id: req.movie_session_id,
            })?;

        validate_seat(geometry, req.row, req.seat).map_err(|e| BookingError::OutOfRange {
            index,
            field: e.field,
            value: e.value,
            bound: e.bound,
        })?;

        // A duplicate earlier in the same request would collide once the
        // first copy is inserted, so it counts as taken too.
        if seat_already_staged(&staged, req.movie_session_id, req.row, req.seat)
            || is_taken(tx, req.movie_session_id, req.row, req.seat).await?
        {
            return Err(BookingError::SeatTaken {
                index,
                session_id: req.movie_session_id,
                row: req.row,
                seat: req.seat,
            });
        }

        staged.push((req.movie_session_id, req.row, req.seat));
    }

    let (order_id, created_at) = sqlx::query_as::<_, (i64, NaiveDateTime)>(
        "INSERT INTO orders (user_id) VALUES ($1) RETURNING id, created_at",
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;

    let mut tickets = Vec::with_capacity(requests.len());
    for (index, req) in requests.iter().enumerate() {
        tickets.push(insert_ticket(tx, order_id, index, req).await?);
    }

    Ok(PlacedOrder {
        id: order_id,
        created_at,
        tickets,
    })
}

// A unique violation here means another transaction won the seat between
// our availability check and this insert.
async fn insert_ticket(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
    index: usize,
    req: &TicketRequest,
) -> Result<Ticket, BookingError> {
    sqlx::query_as::<_, Ticket>(
        r#"INSERT INTO tickets (order_id, movie_session_id, "row", seat)
           VALUES ($1, $2, $3, $4)
           RETURNING id, order_id, movie_session_id, "row", seat"#,
    )
    .bind(order_id)
    .bind(req.movie_session_id)
    .bind(req.row)
    .bind(req.seat)
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| match &err {
        sqlx::Error::Database(db)
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
        {
            warn!(
                "seat race lost: session {} row {} seat {}",
                req.movie_session_id, req.row, req.seat
            );
            BookingError::SeatTaken {
                index,
                session_id: req.movie_session_id,
                row: req.row,
                seat: req.seat,
            }
        }
        _ => BookingError::Storage(err),
    })
}

/* ---------- read projections ---------- */

/// Remaining capacity of a session: hall capacity minus sold tickets.
/// `None` when the session does not exist.
pub async fn tickets_available(pool: &PgPool, session_id: i64) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"SELECT h."rows"::BIGINT * h.seats_in_row - COUNT(t.id)
           FROM movie_sessions ms
           JOIN cinema_halls h ON h.id = ms.cinema_hall_id
           LEFT JOIN tickets t ON t.movie_session_id = ms.id
           WHERE ms.id = $1
           GROUP BY h."rows", h.seats_in_row"#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TakenPlace {
    pub row: i32,
    pub seat: i32,
}

/// All sold (row, seat) pairs of a session.
pub async fn taken_places(pool: &PgPool, session_id: i64) -> Result<Vec<TakenPlace>, sqlx::Error> {
    sqlx::query_as::<_, TakenPlace>(
        r#"SELECT "row", seat FROM tickets
           WHERE movie_session_id = $1
           ORDER BY "row", seat"#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
}
