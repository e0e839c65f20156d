//! Expo push gateway client.
//!
//! Wire types for push messages, tickets and receipts, gateway-sized batching,
//! the reqwest-backed transport, and the retrying client used by the engine.

pub mod batcher;
pub mod client;
pub mod error;
pub mod expo;
pub mod message;

pub use client::{PushGatewayClient, RetryPolicy};
pub use error::GatewayError;
pub use expo::{ExpoTransport, PushTransport};
pub use message::{PushErrorDetails, PushMessage, PushReceipt, PushTicket, is_expo_push_token};
