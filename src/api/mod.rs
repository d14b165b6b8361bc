//! HTTP surface: inbound triggers, read API, preferences, observability.

pub mod handlers;
mod routes;

pub use routes::api_routes;
