pub mod health;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::items::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/documents/:document_id/items",
            get(handlers::handle_serve_items),
        )
        .route(
            "/api/v1/documents/:document_id/items/generate",
            post(handlers::handle_generate),
        )
        .route("/api/v1/items/export", get(handlers::handle_export))
        .route(
            "/api/v1/items/:item_id/answers",
            post(handlers::handle_record_answer),
        )
        .route(
            "/api/v1/items/:item_id/active",
            patch(handlers::handle_set_active),
        )
        .route(
            "/api/v1/users/:user_id/review-queue",
            get(handlers::handle_review_queue),
        )
        .with_state(state)
}
