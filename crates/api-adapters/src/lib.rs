//! # api-adapters
//!
//! The web routing layer for the catalog. No business logic lives here;
//! every route is a thin translation onto `services::PostService`.

pub mod handlers;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use handlers::AppState;

/// Builds the API router.
///
/// Mounted at the root so the binary can nest it under a prefix if it
/// ever needs to (e.g. /api/v1/).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/posts", get(handlers::search).post(handlers::create))
        .route("/posts/{id}", get(handlers::show))
        .route("/posts/{id}/tags", put(handlers::edit_tags))
        .route("/posts/{id}/approve", post(handlers::approve))
        .route("/posts/{id}/unapprove", post(handlers::unapprove))
        .route("/posts/{id}/delete", post(handlers::delete))
        .route("/posts/{id}/remove", post(handlers::remove))
        .route("/posts/{id}/parent", put(handlers::set_parent))
        .route("/posts/{id}/votes", post(handlers::vote))
        .route("/posts/{id}/revert", post(handlers::revert))
        .route("/posts/{id}/versions", get(handlers::versions))
        .route("/removed-posts/{id}/restore", post(handlers::restore))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
