//! Request correlation for units of work

use crate::config::LogLevel;
use crate::context::{log_context, BoundLogger, ContextGuard};
use crate::scope::{try_read, unit_of_work, with_state};
use crate::{Fields, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Field key the correlation id is injected under.
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// Unique identifier for correlating related log entries and operations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new random correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create a child correlation ID for nested operations
    pub fn child(&self) -> Self {
        Self(format!("{}-{}", self.0, Uuid::new_v4().simple()))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Bind `id` to the current unit of work, replacing any previous id.
pub fn set_correlation_id(id: impl Into<CorrelationId>) {
    let id = id.into();
    with_state(|state| state.correlation_id = Some(id));
}

/// The id bound to the current unit of work, if any.
pub fn get_correlation_id() -> Option<CorrelationId> {
    try_read(|state| state.correlation_id.clone()).flatten()
}

pub fn clear_correlation_id() {
    with_state(|state| state.correlation_id = None);
}

/// Return the bound id, generating and binding one when absent.
pub fn ensure_correlation_id() -> CorrelationId {
    with_state(|state| {
        state
            .correlation_id
            .get_or_insert_with(CorrelationId::new)
            .clone()
    })
}

/// Run `fut` as a fresh unit of work bound to `id`, or to a generated id.
pub async fn correlation_scope<F: Future>(id: Option<CorrelationId>, fut: F) -> F::Output {
    unit_of_work(async move {
        set_correlation_id(id.unwrap_or_default());
        fut.await
    })
    .await
}

/// Insert the current correlation id into `fields`.
///
/// The key is left out entirely when no id (or an empty one) is bound.
pub fn inject_correlation_id(fields: &mut Fields) {
    if let Some(id) = get_correlation_id().filter(|id| !id.as_str().is_empty()) {
        fields.insert(CORRELATION_ID_KEY.to_string(), Value::String(id.0));
    }
}

/// Per-request bookkeeping: correlation id, a `{request_id, method, path}`
/// context layer and start/completion records.
#[derive(Debug)]
pub struct RequestContext {
    request_id: String,
    correlation_id: CorrelationId,
    start_time: Instant,
    guard: Option<ContextGuard>,
}

impl RequestContext {
    /// Bind the correlation id (generated when `None`), push the request layer
    /// and log the start of the request.
    pub fn start(
        method: &str,
        path: &str,
        correlation_id: Option<CorrelationId>,
    ) -> Result<Self> {
        let correlation_id = match correlation_id {
            Some(id) => {
                set_correlation_id(id.clone());
                id
            }
            None => ensure_correlation_id(),
        };
        let request_id = Uuid::new_v4().to_string();

        let mut layer = Fields::new();
        layer.insert("request_id".to_string(), Value::from(request_id.as_str()));
        layer.insert("method".to_string(), Value::from(method));
        layer.insert("path".to_string(), Value::from(path));
        let guard = log_context(layer)?;

        guard.logger().info("Request started");

        Ok(Self {
            request_id,
            correlation_id,
            start_time: Instant::now(),
            guard: Some(guard),
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Logger bound to the request layer.
    pub fn logger(&self) -> BoundLogger {
        self.guard
            .as_ref()
            .map(|guard| guard.logger().clone())
            .unwrap_or_default()
    }

    /// Log completion with `status_code` and `duration_ms`, then pop the layer.
    pub fn complete(mut self, status_code: u16) {
        let level = match status_code {
            500..=u16::MAX => LogLevel::Error,
            400..=499 => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        let duration_ms = self.elapsed().as_secs_f64() * 1000.0;

        let mut extra = Fields::new();
        extra.insert("status_code".to_string(), Value::from(status_code));
        extra.insert(
            "duration_ms".to_string(),
            Value::from((duration_ms * 100.0).round() / 100.0),
        );
        self.logger().log(level, "Request completed", extra);

        self.guard.take();
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard
                .logger()
                .warn("Request context dropped without completion");
        }
    }
}
