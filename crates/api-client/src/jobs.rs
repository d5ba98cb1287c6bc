//! Asynchronous platform jobs
//!
//! Compilation, export, import and log-download run as server-side jobs. Their
//! status endpoints answer with one of two shapes:
//!
//! ```json
//! {"status": "In Progress", "response_data": {"progress": 50}}
//! {"status": "completed", "outputs": {"files": ["..."]}}
//! ```
//!
//! [`JobSnapshot`] normalizes both, and [`poll_job`] binds them to the generic
//! poll loop in `rulehub_core`.

use crate::error::{ApiResult, Error, SdkError};
use rulehub_core::poll::{self, JobState, PollError};
use rulehub_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use tracing::debug;

/// Normalized job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, or no status reported yet
    Pending,
    /// Running
    Processing,
    /// Finished successfully
    Completed,
    /// Finished and archived
    Closed,
    /// Reported failure
    Failed,
}

impl JobStatus {
    /// Normalize a raw platform status string
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "completed" | "complete" | "success" | "succeeded" | "done" => Self::Completed,
            "closed" => Self::Closed,
            "failed" | "failure" | "error" => Self::Failed,
            "processing" | "inprogress" | "running" | "started" => Self::Processing,
            _ => Self::Pending,
        }
    }

    /// Whether the job finished successfully
    #[must_use]
    pub fn is_done(self) -> bool {
        matches!(self, Self::Completed | Self::Closed)
    }
}

/// One read of a job status endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    /// Normalized status
    pub status: JobStatus,
    /// Status string as reported
    pub raw_status: String,
    /// Progress, 0 to 100
    pub progress: u8,
    /// Full response body
    pub body: Value,
}

impl JobSnapshot {
    /// Normalize a status response body
    #[must_use]
    pub fn from_value(body: Value) -> Self {
        let raw_status = body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let progress = body
            .pointer("/response_data/progress")
            .or_else(|| body.get("progress"))
            .and_then(|p| p.as_f64().or_else(|| p.as_str()?.trim().parse().ok()))
            .map_or(0, clamp_progress);

        Self {
            status: JobStatus::parse(&raw_status),
            raw_status,
            progress,
            body,
        }
    }

    /// Job outputs, in either response shape
    #[must_use]
    pub fn outputs(&self) -> Option<&Value> {
        self.body
            .get("outputs")
            .or_else(|| self.body.pointer("/response_data/outputs"))
    }

    /// Value at a key of `response_data` or of the body itself
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.body
            .get("response_data")
            .and_then(|d| d.get(key))
            .or_else(|| self.body.get(key))
    }
}

impl poll::JobStatus for JobSnapshot {
    fn state(&self) -> JobState {
        if self.status == JobStatus::Failed {
            JobState::Failed
        } else if self.status.is_done() || self.progress >= 100 {
            JobState::Completed
        } else {
            JobState::Pending
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_progress(raw: f64) -> u8 {
    if raw.is_nan() {
        0
    } else {
        raw.clamp(0.0, 100.0) as u8
    }
}

/// A completed server-side job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsyncJob {
    /// Job id as issued by the platform
    pub id: String,
    /// Final normalized status
    pub status: JobStatus,
    /// Final progress
    pub progress: u8,
    /// Final status payload
    pub result: Option<Value>,
}

impl AsyncJob {
    fn completed(id: &str, snapshot: JobSnapshot) -> Self {
        Self {
            id: id.to_string(),
            status: if snapshot.status.is_done() {
                snapshot.status
            } else {
                JobStatus::Completed
            },
            progress: 100,
            result: Some(snapshot.body),
        }
    }

    /// Job outputs from the final payload
    #[must_use]
    pub fn outputs(&self) -> Option<&Value> {
        let result = self.result.as_ref()?;
        result
            .get("outputs")
            .or_else(|| result.pointer("/response_data/outputs"))
    }

    /// Value at a key of the final payload's `response_data`, or of the
    /// payload itself
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        let result = self.result.as_ref()?;
        result
            .get("response_data")
            .and_then(|d| d.get(key))
            .or_else(|| result.get(key))
    }
}

/// Poll a job status endpoint until completion
///
/// `fetch` performs one status read and returns the decoded body. A job that
/// reports `failed` yields [`Error::JobFailed`]; a job still pending after
/// `config.max_retries` reads yields an [`SdkError`] whose cause is the last
/// body observed.
pub async fn poll_job<F, Fut>(job_id: &str, config: &RetryConfig, mut fetch: F) -> ApiResult<AsyncJob>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<Value>>,
{
    debug!(job_id, max_retries = config.max_retries, "Polling job");

    let outcome = poll::poll(config, || {
        let read = fetch();
        async move { read.await.map(JobSnapshot::from_value) }
    })
    .await;

    match outcome {
        Ok(polled) => {
            debug!(job_id, attempts = polled.attempts, "Job completed");
            Ok(AsyncJob::completed(job_id, polled.value))
        }
        Err(PollError::Failed { last, .. }) => Err(Error::JobFailed {
            job_id: job_id.to_string(),
            status: last.raw_status,
            response: last.body,
        }),
        Err(PollError::TimedOut { attempts, last }) => Err(SdkError::new(format!(
            "job {job_id} did not complete after {attempts} status checks"
        ))
        .with_cause(last.body)
        .into()),
        Err(PollError::Fetch(e)) => Err(e),
    }
}

/// Extract a job id from a job-creation response
pub fn job_id(body: &Value) -> ApiResult<String> {
    ["/id", "/job_id", "/response_data/id", "/response_data/job_id"]
        .iter()
        .find_map(|pointer| match body.pointer(pointer)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| {
            SdkError::new("job creation response has no job id")
                .with_cause(body.clone())
                .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulehub_core::poll::JobStatus as _;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn config(max_retries: u32) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(max_retries)
            .with_retry_interval(Duration::from_millis(100))
    }

    fn script(bodies: Vec<Value>) -> Arc<Mutex<VecDeque<Value>>> {
        Arc::new(Mutex::new(bodies.into_iter().collect()))
    }

    #[test]
    fn test_status_normalization() {
        assert_eq!(JobStatus::parse("Success"), JobStatus::Completed);
        assert_eq!(JobStatus::parse("completed"), JobStatus::Completed);
        assert_eq!(JobStatus::parse("closed"), JobStatus::Closed);
        assert_eq!(JobStatus::parse("In Progress"), JobStatus::Processing);
        assert_eq!(JobStatus::parse("in_progress"), JobStatus::Processing);
        assert_eq!(JobStatus::parse("FAILED"), JobStatus::Failed);
        assert_eq!(JobStatus::parse(""), JobStatus::Pending);
        assert_eq!(JobStatus::parse("queued"), JobStatus::Pending);
    }

    #[test]
    fn test_snapshot_shapes() {
        let progress = JobSnapshot::from_value(json!({
            "status": "In Progress",
            "response_data": {"progress": 50}
        }));
        assert_eq!(progress.progress, 50);
        assert_eq!(progress.state(), JobState::Pending);

        let done = JobSnapshot::from_value(json!({
            "status": "completed",
            "outputs": {"files": ["a.zip"]}
        }));
        assert_eq!(done.state(), JobState::Completed);
        assert_eq!(done.outputs().unwrap()["files"][0], "a.zip");

        let full = JobSnapshot::from_value(json!({"response_data": {"progress": "100"}}));
        assert_eq!(full.state(), JobState::Completed);

        let over = JobSnapshot::from_value(json!({"progress": 250.0}));
        assert_eq!(over.progress, 100);
    }

    #[test]
    fn test_failed_status_wins_over_progress() {
        let snapshot = JobSnapshot::from_value(json!({
            "status": "failed",
            "response_data": {"progress": 100}
        }));
        assert_eq!(snapshot.state(), JobState::Failed);
    }

    #[test]
    fn test_job_id_extraction() {
        assert_eq!(job_id(&json!({"id": "job-1"})).unwrap(), "job-1");
        assert_eq!(
            job_id(&json!({"response_data": {"job_id": 42}})).unwrap(),
            "42"
        );
        assert!(matches!(job_id(&json!({"status": "ok"})), Err(Error::Sdk(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_completes_on_third_read() {
        let bodies = script(vec![
            json!({"status": "In Progress", "response_data": {"progress": 0}}),
            json!({"status": "In Progress", "response_data": {"progress": 50}}),
            json!({"status": "In Progress", "response_data": {"progress": 100, "download_url": "https://x/y"}}),
        ]);
        let reads = Arc::new(Mutex::new(0u32));

        let job = poll_job("job-1", &config(3), || {
            let bodies = bodies.clone();
            let reads = reads.clone();
            async move {
                *reads.lock().unwrap() += 1;
                Ok(bodies.lock().unwrap().pop_front().unwrap())
            }
        })
        .await
        .unwrap();

        assert_eq!(*reads.lock().unwrap(), 3);
        assert_eq!(job.id, "job-1");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.field("download_url").unwrap(), "https://x/y");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_last_status() {
        let bodies = script(
            (0..5)
                .map(|i| json!({"status": "In Progress", "response_data": {"progress": i * 10}}))
                .collect(),
        );

        let err = poll_job("job-2", &config(2), || {
            let bodies = bodies.clone();
            async move { Ok(bodies.lock().unwrap().pop_front().unwrap()) }
        })
        .await
        .unwrap_err();

        match err {
            Error::Sdk(e) => {
                assert!(e.message.contains("job-2"));
                assert_eq!(e.cause.unwrap()["response_data"]["progress"], 10);
            }
            other => panic!("expected SdkError, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_failure_is_distinct() {
        let bodies = script(vec![json!({"status": "Failed", "errors": ["bad sheet"]})]);

        let err = poll_job("job-3", &config(5), || {
            let bodies = bodies.clone();
            async move { Ok(bodies.lock().unwrap().pop_front().unwrap()) }
        })
        .await
        .unwrap_err();

        match err {
            Error::JobFailed {
                job_id,
                status,
                response,
            } => {
                assert_eq!(job_id, "job-3");
                assert_eq!(status, "Failed");
                assert_eq!(response["errors"][0], "bad sheet");
            }
            other => panic!("expected JobFailed, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_propagates() {
        let err = poll_job("job-4", &config(5), || async {
            Err(Error::sdk("status read failed"))
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("status read failed"));
    }
}
