//! HTTP API handlers for muzi-import

pub mod auth;
pub mod health;
pub mod import;
pub mod progress;

pub use auth::{UserId, USER_ID_HEADER};
pub use health::health_routes;
pub use import::import_routes;
pub use progress::progress_routes;
