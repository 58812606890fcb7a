//! Operation polling with backoff and a wall-clock deadline.

use crate::config::PollPolicy;
use crate::error::{ProviderErrorDetail, Result, VeoFlowError};
use crate::video::client::OperationSource;
use crate::video::types::{OperationHandle, OperationStatus};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Interprets one operation resource.
///
/// An `error` value wins over `done`. A `done` operation without
/// `response.generateVideoResponse.generatedSamples[0].video.uri` is a
/// [`VeoFlowError::MalformedResponse`], not a provider failure.
pub fn parse_operation(value: &Value) -> Result<OperationStatus> {
    let operation = VeoOperation::deserialize(value).map_err(|e| {
        VeoFlowError::MalformedResponse(format!("operation has an unexpected shape: {e}"))
    })?;

    if let Some(error) = operation.error {
        return Ok(OperationStatus::Failed(ProviderErrorDetail::from_value(error)));
    }

    if !operation.done.unwrap_or(false) {
        return Ok(OperationStatus::Pending);
    }

    operation
        .response
        .and_then(|r| r.generate_video_response)
        .and_then(|g| g.generated_samples)
        .and_then(|samples| samples.into_iter().next())
        .and_then(|s| s.video)
        .and_then(|v| v.uri)
        .map(OperationStatus::Done)
        .ok_or_else(|| {
            VeoFlowError::MalformedResponse(format!(
                "operation is done but has no video URI: {value}"
            ))
        })
}

/// Shortest wait the schedule will produce.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Growing wait intervals: start, multiply by the factor, clamp to the cap.
///
/// Growth saturates at the cap, so any factor is safe here; a zero start
/// interval is raised to one millisecond.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    /// Creates a schedule from a poll policy.
    pub fn new(policy: &PollPolicy) -> Self {
        let max = policy.max_interval.max(MIN_INTERVAL);
        Self {
            current: policy.initial_interval.clamp(MIN_INTERVAL, max),
            factor: policy.factor,
            max,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let wait = self.current;
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.factor)
            .map_or(self.max, |next| next.clamp(wait, self.max));
        Some(wait)
    }
}

/// Waits for operations to reach a terminal state.
#[derive(Debug, Clone)]
pub struct Poller {
    policy: PollPolicy,
}

impl Poller {
    /// Creates a poller with the given policy.
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    /// Polling policy in use.
    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Polls `handle` until it is done, failed, timed out or cancelled.
    ///
    /// The deadline is measured from `started_at`. Transient query errors are
    /// logged and retried after the current interval, or after the server's
    /// `Retry-After` hint when that is longer.
    pub async fn wait(
        &self,
        source: &dyn OperationSource,
        handle: &OperationHandle,
        started_at: Instant,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if handle.base_url() != source.base_url().trim_end_matches('/') {
            return Err(VeoFlowError::InvalidRequest(format!(
                "operation {} was issued by {}, not {}",
                handle,
                handle.base_url(),
                source.base_url()
            )));
        }

        let limit = self.policy.timeout;
        let mut backoff = Backoff::new(&self.policy);

        while started_at.elapsed() < limit {
            tracing::info!(
                operation = %handle,
                elapsed_secs = started_at.elapsed().as_secs(),
                "polling status"
            );

            let mut retry_after = None;
            match source.fetch_operation(handle).await {
                Ok(value) => match parse_operation(&value)? {
                    OperationStatus::Done(uri) => {
                        tracing::info!(operation = %handle, %uri, "video generation complete");
                        return Ok(uri);
                    }
                    OperationStatus::Failed(detail) => {
                        tracing::error!(operation = %handle, error = %detail.raw, "operation failed");
                        return Err(VeoFlowError::Provider(detail));
                    }
                    OperationStatus::Pending => {}
                },
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        operation = %handle,
                        status = ?e.status_code(),
                        "error polling operation status: {e}"
                    );
                    retry_after = e.retry_after();
                }
                Err(e) => return Err(e),
            }

            let remaining = limit.saturating_sub(started_at.elapsed());
            let interval = backoff.next().unwrap_or(self.policy.max_interval);
            let wait = retry_after.map_or(interval, |hint| hint.max(interval)).min(remaining);
            tracing::debug!(operation = %handle, wait_ms = wait.as_millis() as u64, "waiting");

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::warn!(operation = %handle, "polling cancelled");
                    return Err(VeoFlowError::Cancelled);
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        let elapsed = started_at.elapsed();
        tracing::error!(
            operation = %handle,
            elapsed_secs = elapsed.as_secs(),
            "timed out waiting for operation"
        );
        Err(VeoFlowError::Timeout { elapsed, limit })
    }
}

// ── Operation resource ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct VeoOperation {
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    response: Option<VeoVideoResponse>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VeoVideoResponse {
    #[serde(default)]
    generate_video_response: Option<VeoGenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VeoGenerateVideoResponse {
    #[serde(default)]
    generated_samples: Option<Vec<VeoGeneratedSample>>,
}

#[derive(Debug, Deserialize)]
struct VeoGeneratedSample {
    #[serde(default)]
    video: Option<VeoVideo>,
}

#[derive(Debug, Deserialize)]
struct VeoVideo {
    #[serde(default)]
    uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const BASE: &str = "https://proxy.example.com/v1beta";

    /// Replays canned replies; repeats the last one when the script runs out.
    struct Scripted {
        replies: Mutex<VecDeque<Result<Value>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Value>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl OperationSource for Scripted {
        async fn fetch_operation(&self, _handle: &OperationHandle) -> Result<Value> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                match replies.front().unwrap() {
                    Ok(v) => Ok(v.clone()),
                    Err(_) => Err(VeoFlowError::Api {
                        status: 503,
                        message: "unavailable".into(),
                        headers: vec![],
                    }),
                }
            }
        }

        fn base_url(&self) -> &str {
            BASE
        }
    }

    fn done_with(uri: &str) -> Value {
        json!({
            "done": true,
            "response": {"generateVideoResponse": {"generatedSamples": [{"video": {"uri": uri}}]}}
        })
    }

    fn policy(timeout_secs: u64) -> PollPolicy {
        PollPolicy {
            timeout: Duration::from_secs(timeout_secs),
            ..PollPolicy::default()
        }
    }

    fn handle() -> OperationHandle {
        OperationHandle::new("operations/op1", BASE)
    }

    #[test]
    fn test_backoff_sequence() {
        let waits: Vec<f64> = Backoff::new(&PollPolicy::default())
            .take(10)
            .map(|d| d.as_secs_f64())
            .collect();
        let expected = [10.0, 12.0, 14.4, 17.28, 20.736, 24.8832, 29.85984, 30.0, 30.0, 30.0];
        for (got, want) in waits.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_backoff_never_exceeds_cap() {
        assert!(Backoff::new(&PollPolicy::default())
            .take(1000)
            .all(|d| d <= Duration::from_secs(30)));
    }

    #[test]
    fn test_backoff_saturates_on_extreme_factors() {
        for factor in [f64::NAN, f64::INFINITY, 1e18, 0.0] {
            let policy = PollPolicy {
                factor,
                ..PollPolicy::default()
            };
            let waits: Vec<Duration> = Backoff::new(&policy).take(3).collect();
            assert_eq!(waits[0], Duration::from_secs(10), "factor {factor}");
            assert!(
                waits.iter().all(|d| *d >= Duration::from_secs(10) && *d <= Duration::from_secs(30)),
                "factor {factor}: {waits:?}"
            );
        }
    }

    #[test]
    fn test_backoff_zero_start_still_waits() {
        let policy = PollPolicy {
            initial_interval: Duration::ZERO,
            ..PollPolicy::default()
        };
        assert!(Backoff::new(&policy).take(5).all(|d| !d.is_zero()));
    }

    #[test]
    fn test_parse_done_extracts_uri() {
        let value = json!({
            "done": true,
            "response": {"generateVideoResponse": {"generatedSamples": [{"video": {"uri": "X"}}]}}
        });
        assert_eq!(
            parse_operation(&value).unwrap(),
            OperationStatus::Done("X".into())
        );
    }

    #[test]
    fn test_parse_error_wins_over_done() {
        for done in [json!(true), json!(false), Value::Null] {
            let value = json!({"done": done, "error": {"code": 3, "message": "bad prompt"}});
            match parse_operation(&value).unwrap() {
                OperationStatus::Failed(detail) => {
                    assert_eq!(detail.message.as_deref(), Some("bad prompt"))
                }
                other => panic!("Expected Failed, got: {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_pending() {
        assert_eq!(
            parse_operation(&json!({"name": "operations/1", "done": false})).unwrap(),
            OperationStatus::Pending
        );
        assert_eq!(
            parse_operation(&json!({"name": "operations/1"})).unwrap(),
            OperationStatus::Pending
        );
    }

    #[test]
    fn test_parse_done_without_uri_is_malformed() {
        let cases = [
            json!({"done": true}),
            json!({"done": true, "response": {"generateVideoResponse": {"generatedSamples": []}}}),
            json!({"done": true, "response": {"generateVideoResponse": {"generatedSamples": [{"video": {}}]}}}),
        ];
        for value in cases {
            assert!(matches!(
                parse_operation(&value),
                Err(VeoFlowError::MalformedResponse(_))
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_always_pending() {
        let source = Scripted::new(vec![Ok(json!({"done": false}))]);
        let started = Instant::now();
        let err = Poller::new(policy(5))
            .wait(&source, &handle(), started, &CancellationToken::new())
            .await
            .unwrap_err();

        let elapsed = started.elapsed();
        assert!(matches!(err, VeoFlowError::Timeout { .. }), "{err:?}");
        assert!(elapsed >= Duration::from_secs(5), "timed out early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(6), "timed out late: {elapsed:?}");
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_after_pending_ticks() {
        let source = Scripted::new(vec![
            Ok(json!({"done": false})),
            Ok(json!({"done": false})),
            Ok(done_with("https://generativelanguage.googleapis.com/v1beta/files/abc")),
        ]);
        let started = Instant::now();
        let uri = Poller::new(PollPolicy::default())
            .wait(&source, &handle(), started, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(uri, "https://generativelanguage.googleapis.com/v1beta/files/abc");
        assert_eq!(source.calls(), 3);
        // 10s + 12s of waiting between the three polls
        assert!(started.elapsed() >= Duration::from_secs(22));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_is_terminal() {
        let source = Scripted::new(vec![Ok(json!({"done": true, "error": {"message": "quota"}}))]);
        let err = Poller::new(PollPolicy::default())
            .wait(&source, &handle(), Instant::now(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VeoFlowError::Provider(_)), "{err:?}");
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let source = Scripted::new(vec![
            Err(VeoFlowError::Api {
                status: 502,
                message: "bad gateway".into(),
                headers: vec![],
            }),
            Ok(done_with("files/abc")),
        ]);
        let uri = Poller::new(PollPolicy::default())
            .wait(&source, &handle(), Instant::now(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(uri, "files/abc");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint_lengthens_wait() {
        let source = Scripted::new(vec![
            Err(VeoFlowError::RateLimited {
                retry_after: Some(Duration::from_secs(25)),
            }),
            Ok(done_with("files/abc")),
        ]);
        let started = Instant::now();
        Poller::new(PollPolicy::default())
            .wait(&source, &handle(), started, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls(), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(25), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(26), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_stops() {
        let source = Scripted::new(vec![
            Err(VeoFlowError::Auth("revoked".into())),
            Ok(done_with("files/abc")),
        ]);
        let err = Poller::new(PollPolicy::default())
            .wait(&source, &handle(), Instant::now(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VeoFlowError::Auth(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let source = Scripted::new(vec![Ok(json!({"done": false}))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Poller::new(PollPolicy::default())
            .wait(&source, &handle(), Instant::now(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, VeoFlowError::Cancelled));
    }

    #[tokio::test]
    async fn test_rejects_handle_from_other_base_url() {
        let source = Scripted::new(vec![Ok(done_with("files/abc"))]);
        let foreign = OperationHandle::new("operations/op1", "https://other.example.com/v1");
        let err = Poller::new(PollPolicy::default())
            .wait(&source, &foreign, Instant::now(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VeoFlowError::InvalidRequest(_)));
        assert_eq!(source.calls(), 0);
    }
}
