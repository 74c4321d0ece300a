use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use studyhall::{AppState, db, oracle::HttpOracle, ratelimit::{self, RateLimiter}, rooms, rooms::hub::RoomHub};
use tower_http::cors::CorsLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};
use tracing_subscriber::EnvFilter;

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("studyhall=info")),
        )
        .init();

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(dotenv::var("DATABASE_URL").unwrap().as_str())
        .await
        .unwrap();
    db::init(&db_pool).await.unwrap();

    let limiter = RateLimiter::new();
    {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                limiter.sweep(ratelimit::DEFAULT_MAX_AGE);
            }
        });
    }

    let app_state = AppState {
        db_pool,
        hub: RoomHub::default(),
        limiter,
        oracle: Arc::new(HttpOracle::from_env().unwrap()),
    };

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(60)));

    let app = Router::new()
        .nest("/rooms", rooms::router())
        .with_state(app_state)
        .layer(session_layer)
        .layer(CorsLayer::permissive());

    let addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    tracing::info!(%addr, "studyhall listening");
    axum::serve(listener, app).await.unwrap();
}
