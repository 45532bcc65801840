//! HTTP-level tests: the full router wired to a per-test database, driven
//! through `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose, Engine as _};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceExt;

use cinema_booking::config::{AppConfig, Config, DatabaseConfig};
use cinema_booking::controllers;
use cinema_booking::database::Database;
use cinema_booking::AppState;

/* ---------- harness ---------- */

fn app(pool: PgPool) -> Router {
    let config = Config {
        app: AppConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            rust_log: "info".to_string(),
        },
        database: DatabaseConfig {
            url: String::new(),
            pool_size: 5,
            acquire_timeout_secs: 5,
        },
    };
    let state = Arc::new(AppState {
        db: Database { pool },
        config,
    });

    Router::new()
        .nest("/api", controllers::routes())
        .with_state(state)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn with_auth(mut req: Request<Body>, email: &str) -> Request<Body> {
    let credentials = general_purpose::STANDARD.encode(format!("{}:secret", email));
    req.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Basic {}", credentials).parse().unwrap(),
    );
    req
}

async fn seed_user(pool: &PgPool, email: &str) {
    let hash = bcrypt::hash("secret", 4).unwrap();
    sqlx::query("INSERT INTO users (email, password_hash) VALUES ($1, $2)")
        .bind(email)
        .bind(hash)
        .execute(pool)
        .await
        .unwrap();
}

// Hall (5 x 8), genre, actor, movie, one session. Returns the session id.
async fn seed_catalog(app: &Router) -> i64 {
    let (status, hall) = send(
        app,
        post(
            "/api/cinema-halls",
            json!({"name": "Main", "rows": 5, "seats_in_row": 8}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, genre) = send(app, post("/api/genres", json!({"name": "Sci-Fi"}))).await;
    let (_, actor) = send(
        app,
        post(
            "/api/actors",
            json!({"first_name": "Keanu", "last_name": "Reeves"}),
        ),
    )
    .await;

    let (status, movie) = send(
        app,
        post(
            "/api/movies",
            json!({
                "title": "The Matrix",
                "description": "Simulated reality",
                "duration": 136,
                "genres": [genre["id"]],
                "actors": [actor["id"]],
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, session) = send(
        app,
        post(
            "/api/movie-sessions",
            json!({
                "movie": movie["id"],
                "cinema_hall": hall["id"],
                "show_time": "2026-02-01T19:00:00",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    session["id"].as_i64().unwrap()
}

/* ---------- tests ---------- */

#[sqlx::test(migrations = "src/migrations")]
async fn full_booking_flow(pool: PgPool) {
    seed_user(&pool, "alice@example.com").await;
    seed_user(&pool, "bob@example.com").await;
    let app = app(pool);
    let session_id = seed_catalog(&app).await;

    // Fresh session sells the whole hall.
    let (status, sessions) = send(&app, get("/api/movie-sessions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sessions[0]["tickets_available"], json!(40));
    assert_eq!(sessions[0]["cinema_hall_capacity"], json!(40));
    assert_eq!(sessions[0]["movie_title"], json!("The Matrix"));

    let order_body = json!({"tickets": [
        {"movie_session": session_id, "row": 1, "seat": 1},
        {"movie_session": session_id, "row": 1, "seat": 2},
    ]});
    let (status, order) = send(
        &app,
        with_auth(post("/api/orders", order_body), "alice@example.com"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["tickets"].as_array().unwrap().len(), 2);

    let (_, sessions) = send(&app, get("/api/movie-sessions")).await;
    assert_eq!(sessions[0]["tickets_available"], json!(38));

    let (status, detail) = send(&app, get(&format!("/api/movie-sessions/{}", session_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        detail["taken_places"],
        json!([{"row": 1, "seat": 1}, {"row": 1, "seat": 2}])
    );
    assert_eq!(detail["movie"]["genres"], json!(["Sci-Fi"]));
    assert_eq!(detail["cinema_hall"]["capacity"], json!(40));

    // Order listing is scoped to the authenticated user.
    let (status, orders) = send(&app, with_auth(get("/api/orders"), "alice@example.com")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders.as_array().unwrap().len(), 1);
    assert_eq!(orders[0]["tickets"].as_array().unwrap().len(), 2);
    assert_eq!(
        orders[0]["tickets"][0]["movie_session"]["movie_title"],
        json!("The Matrix")
    );

    let (_, orders) = send(&app, with_auth(get("/api/orders"), "bob@example.com")).await;
    assert_eq!(orders.as_array().unwrap().len(), 0);
}

#[sqlx::test(migrations = "src/migrations")]
async fn order_rejections_over_http(pool: PgPool) {
    seed_user(&pool, "alice@example.com").await;
    seed_user(&pool, "bob@example.com").await;
    let app = app(pool);
    let session_id = seed_catalog(&app).await;

    // No credentials.
    let (status, _) = send(&app, post("/api/orders", json!({"tickets": []}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Empty ticket list.
    let (status, body) = send(
        &app,
        with_auth(post("/api/orders", json!({"tickets": []})), "alice@example.com"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        json!("order must contain at least one ticket")
    );

    // Row outside the 5-row hall.
    let (status, body) = send(
        &app,
        with_auth(
            post(
                "/api/orders",
                json!({"tickets": [{"movie_session": session_id, "row": 6, "seat": 1}]}),
            ),
            "alice@example.com",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        json!("ticket 0: row 6 is out of range (1 to 5)")
    );

    // Seat sold to another user.
    let (status, _) = send(
        &app,
        with_auth(
            post(
                "/api/orders",
                json!({"tickets": [{"movie_session": session_id, "row": 3, "seat": 4}]}),
            ),
            "alice@example.com",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        with_auth(
            post(
                "/api/orders",
                json!({"tickets": [{"movie_session": session_id, "row": 3, "seat": 4}]}),
            ),
            "bob@example.com",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body["error"],
        json!(format!(
            "ticket 0: row 3, seat 4 is already taken for session {}",
            session_id
        ))
    );

    // The rejected order left nothing behind.
    let (_, orders) = send(&app, with_auth(get("/api/orders"), "bob@example.com")).await;
    assert_eq!(orders.as_array().unwrap().len(), 0);
}

#[sqlx::test(migrations = "src/migrations")]
async fn movie_and_session_filters(pool: PgPool) {
    seed_user(&pool, "alice@example.com").await;
    let app = app(pool);
    seed_catalog(&app).await;

    let (_, comedy) = send(&app, post("/api/genres", json!({"name": "Comedy"}))).await;
    let (status, _) = send(
        &app,
        post(
            "/api/movies",
            json!({
                "title": "Paddington",
                "description": "A bear in London",
                "duration": 95,
                "genres": [comedy["id"]],
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Case-insensitive substring match on the title.
    let (_, movies) = send(&app, get("/api/movies?title=matr")).await;
    assert_eq!(movies.as_array().unwrap().len(), 1);
    assert_eq!(movies[0]["title"], json!("The Matrix"));
    assert_eq!(movies[0]["actors"], json!(["Keanu Reeves"]));

    // Genre filter; non-numeric entries in the list are ignored.
    let uri = format!("/api/movies?genres={},abc", comedy["id"]);
    let (_, movies) = send(&app, get(&uri)).await;
    assert_eq!(movies.as_array().unwrap().len(), 1);
    assert_eq!(movies[0]["title"], json!("Paddington"));

    let (_, movies) = send(&app, get("/api/movies")).await;
    assert_eq!(movies.as_array().unwrap().len(), 2);

    // Date filter: matching day, other day, unparseable value.
    let (_, sessions) = send(&app, get("/api/movie-sessions?date=2026-02-01")).await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    let (_, sessions) = send(&app, get("/api/movie-sessions?date=2026-02-02")).await;
    assert_eq!(sessions.as_array().unwrap().len(), 0);
    let (_, sessions) = send(&app, get("/api/movie-sessions?date=not-a-date")).await;
    assert_eq!(sessions.as_array().unwrap().len(), 0);
}

#[sqlx::test(migrations = "src/migrations")]
async fn catalog_payload_validation(pool: PgPool) {
    let app = app(pool);

    let (status, _) = send(
        &app,
        post(
            "/api/cinema-halls",
            json!({"name": "Broken", "rows": 0, "seats_in_row": 8}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, post("/api/genres", json!({"name": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Duplicate genre names collide on the unique constraint.
    let (status, _) = send(&app, post("/api/genres", json!({"name": "Drama"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, post("/api/genres", json!({"name": "Drama"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, get("/api/movies/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
