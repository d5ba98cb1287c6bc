//! Polling loop for server-side asynchronous jobs
//!
//! A job is read repeatedly until it reports completion, reports its own
//! failure, or the retry budget runs out. Between reads the loop sleeps for
//! the exponential backoff from [`RetryConfig::delay_for_attempt`].
//!
//! ```text
//! Pending --read--> Completed
//!    |  \--read--> Failed
//!    \--budget exhausted--> TimedOut
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use rulehub_core::poll::{poll, JobState, JobStatus};
//! use rulehub_core::retry::RetryConfig;
//!
//! struct Progress(u8);
//!
//! impl JobStatus for Progress {
//!     fn state(&self) -> JobState {
//!         if self.0 >= 100 { JobState::Completed } else { JobState::Pending }
//!     }
//! }
//!
//! # async fn run() {
//! let done = poll(&RetryConfig::patient(), || async {
//!     Ok::<_, std::io::Error>(Progress(100))
//! })
//! .await;
//! assert!(done.is_ok());
//! # }
//! ```

use crate::retry::RetryConfig;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Normalized state of a job as seen by one status read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Still queued or running
    Pending,
    /// Finished successfully
    Completed,
    /// The job itself reported failure
    Failed,
}

/// A status read that can be classified into a [`JobState`]
pub trait JobStatus {
    /// Classify this status read
    fn state(&self) -> JobState;
}

/// Successful poll with attempt information
#[derive(Debug)]
pub struct Polled<T> {
    /// The status read that reported completion
    pub value: T,
    /// Number of status reads made
    pub attempts: u32,
    /// Total time spent polling
    pub total_duration: Duration,
}

/// Poll failure
#[derive(Debug)]
pub enum PollError<T, E> {
    /// Retry budget exhausted before completion; the job may still be running
    TimedOut {
        /// Number of status reads made
        attempts: u32,
        /// Last status read observed
        last: T,
    },
    /// The job reported its own failure
    Failed {
        /// Number of status reads made
        attempts: u32,
        /// The failing status read
        last: T,
    },
    /// A status read could not be performed
    Fetch(E),
}

impl<T, E: fmt::Display> fmt::Display for PollError<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::TimedOut { attempts, .. } => {
                write!(f, "Job did not complete after {attempts} attempts")
            }
            PollError::Failed { attempts, .. } => {
                write!(f, "Job reported failure on attempt {attempts}")
            }
            PollError::Fetch(e) => write!(f, "Status read failed: {e}"),
        }
    }
}

impl<T: fmt::Debug, E: std::error::Error + 'static> std::error::Error for PollError<T, E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Fetch(e) => Some(e),
            PollError::TimedOut { .. } | PollError::Failed { .. } => None,
        }
    }
}

/// Poll `fetch` until the job leaves [`JobState::Pending`]
///
/// At most `config.max_retries` reads are made (at least one). No sleep
/// follows the final read.
pub async fn poll<T, E, F, Fut>(config: &RetryConfig, mut fetch: F) -> Result<Polled<T>, PollError<T, E>>
where
    T: JobStatus,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let mut retries: u32 = 0;

    loop {
        let status = fetch().await.map_err(PollError::Fetch)?;
        let attempts = retries + 1;

        match status.state() {
            JobState::Completed => {
                debug!(attempts, "Job completed");
                return Ok(Polled {
                    value: status,
                    attempts,
                    total_duration: start.elapsed(),
                });
            }
            JobState::Failed => {
                debug!(attempts, "Job reported failure");
                return Err(PollError::Failed {
                    attempts,
                    last: status,
                });
            }
            JobState::Pending => {}
        }

        if attempts >= config.max_retries {
            debug!(attempts, "Polling budget exhausted");
            return Err(PollError::TimedOut {
                attempts,
                last: status,
            });
        }

        let delay = config.delay_for_attempt(retries);
        debug!(
            attempt = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Job pending, polling again after delay"
        );
        tokio::time::sleep(delay).await;
        retries = attempts;
    }
}
