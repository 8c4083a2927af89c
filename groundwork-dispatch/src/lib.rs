//! groundwork-dispatch library - generic action dispatch over declared entities
//!
//! Interprets action documents (get/create/update/delete/connect/response/
//! loadOrder) against the entity registry and persistence gateway, and
//! exposes them over a single HTTP route.

use axum::Router;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod binding;
pub mod context;
pub mod document;
pub mod engine;
pub mod envelope;
pub mod output;
pub mod pagination;

pub use document::{ActionDocument, ActionKind};
pub use engine::ActionDispatcher;
pub use envelope::ResponseEnvelope;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: ActionDispatcher,
}

impl AppState {
    /// Create new application state
    pub fn new(dispatcher: ActionDispatcher) -> Self {
        Self { dispatcher }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::post;

    Router::new()
        .route("/api/actions", post(api::dispatch_actions))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
