//! Shared application state for the Axum API server.

use std::sync::Arc;
use std::time::Duration;

use pushgate_common::config::AppConfig;
use pushgate_engine::dispatcher::PushDispatcher;

use crate::middleware::rate_limit::RateLimiter;

/// Length of one rate-limit window.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub dispatcher: Arc<PushDispatcher>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: AppConfig, dispatcher: Arc<PushDispatcher>) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_per_minute,
            RATE_LIMIT_WINDOW,
        ));
        Self {
            config,
            dispatcher,
            limiter,
        }
    }
}
