// Route table for the Kata API

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/code/execute", post(handlers::execute_code))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
}
