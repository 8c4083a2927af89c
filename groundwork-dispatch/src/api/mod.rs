//! HTTP API handlers for groundwork-dispatch

pub mod actions;
pub mod error;
pub mod health;

pub use actions::dispatch_actions;
pub use error::ApiError;
pub use health::health_routes;
