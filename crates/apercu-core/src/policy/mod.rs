//! Reliability policy for RPC calls and subscriptions.
//!
//! ```text
//! Request → [RetryPolicy] → [Transport]
//! ```

pub mod retry;

pub use retry::{retry, RetryConfig, RetryPolicy};
