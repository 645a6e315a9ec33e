//! HTTP endpoints exposing the mirrored resources.

pub mod routes;
pub mod server;

pub use server::{build_router, start_server, AppState};
