//! HTTP gateway: receives bus events and exposes workflow runs.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
