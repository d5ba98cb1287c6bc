//! Core resilience primitives for the rulehub client
//!
//! This crate holds the transport-agnostic pieces shared by the HTTP layer:
//!
//! - **Retry**: retry budgets and exponential backoff with jitter
//! - **Polling**: the state machine that drives server-side jobs to completion
//!
//! # Example
//!
//! ```rust
//! use rulehub_core::retry::RetryConfig;
//! use std::time::Duration;
//!
//! let config = RetryConfig::default().with_max_retries(5);
//! assert!(config.can_retry(4));
//! assert!(config.delay_for_attempt(1) <= Duration::from_millis(1500));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod poll;
pub mod retry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::poll::{poll, JobState, JobStatus, PollError, Polled};
    pub use crate::retry::{backoff, RetryConfig};
}
