//! Shared stage plumbing: partial results, bounded retry, weighted confidence
//! and the optional metrics sink every stage reports into.

use std::error::Error as _;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NoteError, Result};

/// Degraded output of a stage that could not produce its typed result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub data: Value,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl PartialResult {
    pub fn from_error(error: impl Into<String>) -> Self {
        Self {
            data: Value::Object(Default::default()),
            error: Some(error.into()),
            warnings: Vec::new(),
            timestamp: Utc::now(),
            trace: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}

impl From<NoteError> for PartialResult {
    fn from(error: NoteError) -> Self {
        PartialResult::from_error(error.to_string()).with_trace(error_trace(&error))
    }
}

/// Typed stage output or its degraded substitute.
pub type StageResult<T> = std::result::Result<T, PartialResult>;

fn error_trace(error: &NoteError) -> String {
    let mut trace = format!("{error:?}");
    let mut source = error.source();
    while let Some(cause) = source {
        trace.push_str("\ncaused by: ");
        trace.push_str(&cause.to_string());
        source = cause.source();
    }
    trace
}

/// Destination for per-stage metrics. Implementations must tolerate concurrent writers.
pub trait MetricsSink: Send + Sync {
    fn record(&self, component: &str, metric: &str, value: f64);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record(&self, _component: &str, _metric: &str, _value: f64) {}
}

/// Emits every metric as a debug-level tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, component: &str, metric: &str, value: f64) {
        tracing::debug!(component, metric, value, "metric");
    }
}

pub type SharedSink = Arc<dyn MetricsSink>;

pub fn noop_sink() -> SharedSink {
    Arc::new(NoopSink)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Single attempt, used where a stage has its own fallback chain.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Sleep before the retry that follows failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.min(16)))
    }
}

/// Runs `op`, retrying up to `policy.max_retries` times with exponential backoff.
///
/// After the final failure the last error is converted into a [`PartialResult`]
/// carrying its message and a captured trace.
pub async fn execute_with_retry<T, F, Fut>(
    component: &str,
    policy: &RetryPolicy,
    sink: &dyn MetricsSink,
    op: F,
) -> StageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    execute_with_retry_counted(component, policy, sink, op).await.0
}

/// Same as [`execute_with_retry`], also returning how many retries were spent.
pub async fn execute_with_retry_counted<T, F, Fut>(
    component: &str,
    policy: &RetryPolicy,
    sink: &dyn MetricsSink,
    mut op: F,
) -> (StageResult<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => {
                sink.record(component, "retries", f64::from(attempt));
                return (Ok(value), attempt);
            }
            Err(error) if attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    component,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "stage attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                tracing::error!(
                    component,
                    attempts = attempt + 1,
                    error = %error,
                    "stage failed after retries"
                );
                sink.record(component, "failures", 1.0);
                return (Err(PartialResult::from(error)), attempt);
            }
        }
    }
}

/// Weighted average of named scores.
///
/// Weights default to equal and are renormalized to sum to 1; the result is
/// clamped to `[0, 1]`. Empty scores or a zero total weight yield 0.
pub fn calculate_confidence(scores: &[(&str, f64)], weights: Option<&[(&str, f64)]>) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }

    let equal: Vec<(&str, f64)>;
    let weights = match weights {
        Some(weights) => weights,
        None => {
            let share = 1.0 / scores.len() as f64;
            equal = scores.iter().map(|(name, _)| (*name, share)).collect();
            &equal
        }
    };

    let total_weight: f64 = weights.iter().map(|(_, w)| w).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }

    let confidence: f64 = scores
        .iter()
        .map(|(name, score)| {
            let weight = weights
                .iter()
                .find(|(w_name, _)| w_name == name)
                .map(|(_, w)| w / total_weight)
                .unwrap_or(0.0);
            score * weight
        })
        .sum();

    confidence.clamp(0.0, 1.0)
}

/// Clamps into `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
