//! HTTP surface of the push gateway.
//!
//! - `POST /send-push`: bearer-authenticated, per-IP rate limited dispatch
//! - `GET  /health`: liveness

pub mod middleware;
pub mod routes;
pub mod state;
