use thiserror::Error;

use pushgate_common::error::AppError;

/// Failures talking to the push gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Gateway responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed gateway response: {0}")]
    Decode(String),

    #[error("Gateway returned {got} tickets for a batch of {expected} messages")]
    TicketCountMismatch { expected: usize, got: usize },

    #[error("Batch submission failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<GatewayError>,
    },
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Gateway(err.to_string())
    }
}
