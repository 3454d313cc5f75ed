//! HTTP API handlers for seab-ao.

pub mod debug;
pub mod health;
pub mod results;
pub mod sse;
pub mod submit;
pub mod webhooks;

pub use debug::debug_routes;
pub use health::health_routes;
pub use results::results_routes;
pub use sse::event_stream;
pub use submit::submit_routes;
pub use webhooks::webhook_routes;
