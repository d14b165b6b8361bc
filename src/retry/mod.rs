//! Failure recovery for the real-time channel.

mod engine;
mod queue;

pub use engine::RetryEngine;
pub use queue::{RetryPolicy, RetryQueue, RetryQueueItem, RetryQueueStats};
