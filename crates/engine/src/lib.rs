//! Push dispatch pipeline.
//!
//! Resolve recipients -> create records -> batch -> submit with retry ->
//! track tickets -> reconcile receipts after a fixed delay.

pub mod dispatcher;
pub mod reconciler;
pub mod records;
pub mod request;
pub mod resolver;
pub mod sweeper;
pub mod tracker;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
