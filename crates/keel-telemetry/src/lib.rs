//! # Keel Telemetry
//!
//! Context-scoped structured logging for Keel services.
//!
//! ## Features
//!
//! - **Context Stack**: nested, per-unit-of-work key/value layers with shallow
//!   and deep merge semantics
//! - **Correlation IDs**: one id per request/task/thread, injected into every record
//! - **Redaction**: recursive, depth-bounded scrubbing of sensitive fields in log
//!   records and error payloads
//! - **Formatters**: console, generic JSON, Google Cloud Logging and AWS CloudWatch
//!   schemas, auto-detected from the runtime environment
//! - **Configurable**: TOML file plus `KEEL_*` environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keel_telemetry::{fields, scope, TelemetryConfig, TelemetrySystem};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let _guard = TelemetrySystem::init(TelemetryConfig::default()).await?;
//!
//!     scope::unit_of_work(async {
//!         keel_telemetry::set_correlation_id("req-42");
//!         let _ctx = keel_telemetry::log_context(fields! { user_id = "u-1" })?;
//!         keel_telemetry::info!(password = "hunter2", "User signed in");
//!         Ok::<_, keel_telemetry::Error>(())
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod context;
pub mod correlation;
pub mod error_context;
pub mod filters;
pub mod formatters;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod sanitization;
pub mod scope;
pub mod system;


pub use classifier::{is_sensitive_field, is_sensitive_header, SensitiveFieldCache};
pub use config::{LogFormat, LogLevel, TelemetryConfig};
pub use context::{
    bind_context, clear_context, get_context, log_context, unbind_context, with_context,
    BoundLogger, ContextGuard, ContextLayer, MergeStrategy,
};
pub use correlation::{
    clear_correlation_id, get_correlation_id, set_correlation_id, CorrelationId, RequestContext,
};
pub use error_context::{sanitize_error_context, ForeignError, StructuredError};
pub use pipeline::{emit, Pipeline, PipelineLayer};
pub use record::LogRecord;
pub use sanitization::{sanitize_dict, sanitize_headers, sanitize_sql_params, Sanitizer};
pub use system::{TelemetryGuard, TelemetrySystem};

// Re-export commonly used tracing macros and types
pub use tracing::{debug, error, info, trace, warn, Instrument, Span};

#[doc(hidden)]
pub use serde_json as __serde_json;

/// Field map used for context layers and event fields.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Telemetry-specific errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Context stack depth exceeded (max {max_depth})")]
    ContextDepthExceeded { max_depth: usize },

    #[error("Telemetry system error: {message}")]
    System { message: String },
}

/// Build a [`Fields`] map from `key = value` pairs.
///
/// Values can be anything `serde_json::json!` accepts.
///
/// ```
/// let fields = keel_telemetry::fields! { user_id = "u-1", attempt = 3 };
/// assert_eq!(fields["attempt"], 3);
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::Fields::new()
    };
    ($($key:ident = $value:expr),+ $(,)?) => {{
        let mut map = $crate::Fields::new();
        $(
            map.insert(stringify!($key).to_string(), $crate::__serde_json::json!($value));
        )+
        map
    }};
}

/// Emit a record through the installed pipeline, capturing the caller's module path.
///
/// ```no_run
/// use keel_telemetry::{emit, LogLevel};
/// emit!(LogLevel::Info, "order placed", order_id = 17, total_cents = 2599);
/// ```
#[macro_export]
macro_rules! emit {
    ($level:expr, $message:expr) => {
        $crate::pipeline::emit_at(
            $crate::record::CallSite::new(module_path!(), Some(file!()), Some(line!())),
            $level,
            $message,
            $crate::Fields::new(),
        )
    };
    ($level:expr, $message:expr, $($key:ident = $value:expr),+ $(,)?) => {
        $crate::pipeline::emit_at(
            $crate::record::CallSite::new(module_path!(), Some(file!()), Some(line!())),
            $level,
            $message,
            $crate::fields! { $($key = $value),+ },
        )
    };
}

/// Emit an error record through the installed pipeline, capturing the caller's module path.
///
/// ```no_run
/// use keel_telemetry::{emit_error, LogLevel};
/// let err = keel_telemetry::Error::Config { message: "bad".into() };
/// emit_error!(LogLevel::Error, "reload failed", &err, attempt = 2);
/// ```
#[macro_export]
macro_rules! emit_error {
    ($level:expr, $message:expr, $error:expr) => {
        $crate::pipeline::emit_error_at(
            $crate::record::CallSite::new(module_path!(), Some(file!()), Some(line!())),
            $level,
            $message,
            $error,
            $crate::Fields::new(),
        )
    };
    ($level:expr, $message:expr, $error:expr, $($key:ident = $value:expr),+ $(,)?) => {
        $crate::pipeline::emit_error_at(
            $crate::record::CallSite::new(module_path!(), Some(file!()), Some(line!())),
            $level,
            $message,
            $error,
            $crate::fields! { $($key = $value),+ },
        )
    };
}
