//! Assembled log records

use crate::config::LogLevel;
use crate::correlation::{inject_correlation_id, CORRELATION_ID_KEY};
use crate::error_context::{error_chain, StructuredError};
use crate::sanitization::Sanitizer;
use crate::scope::try_read;
use crate::Fields;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::panic::Location;

/// Suffix appended to string values cut at the configured length.
pub const TRUNCATION_SUFFIX: &str = "...[truncated]";

/// Where an event was emitted from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub module: &'static str,
    pub function: Option<&'static str>,
    pub file: Option<&'static str>,
    pub line: Option<u32>,
}

impl CallSite {
    pub fn new(module: &'static str, file: Option<&'static str>, line: Option<u32>) -> Self {
        Self {
            module,
            function: None,
            file,
            line,
        }
    }

    pub fn with_function(mut self, function: &'static str) -> Self {
        self.function = Some(function);
        self
    }

    /// Call site of the `#[track_caller]` function that invoked this.
    #[track_caller]
    pub fn caller() -> Self {
        Self::from_location(Location::caller())
    }

    /// Call site for a source location.
    ///
    /// A location carries no module path, so the module is the file stem. The
    /// `emit!` and `emit_error!` macros record `module_path!()` instead.
    pub fn from_location(location: &'static Location<'static>) -> Self {
        let file = location.file();
        let stem = file.rsplit(['/', '\\']).next().unwrap_or(file);
        let module = stem.strip_suffix(".rs").unwrap_or(stem);
        Self::new(module, Some(file), Some(location.line()))
    }
}

/// Exception details carried by error records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub error_type: String,
    pub message: String,
    /// `source()` chain, outermost first
    pub traceback: Vec<String>,
}

impl ErrorInfo {
    pub fn from_error<E: StructuredError>(error: &E) -> Self {
        Self {
            error_type: error.error_type().into_owned(),
            message: error.to_string(),
            traceback: error_chain(error),
        }
    }
}

/// One emitted event, ready for a formatter
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Name of the emitting logger (module path or tracing target)
    pub logger: String,
    pub callsite: CallSite,
    /// Effective context: ambient, stack, event fields and correlation id
    pub fields: Fields,
    pub error: Option<ErrorInfo>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>, callsite: CallSite) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            logger: callsite.module.to_string(),
            callsite,
            fields: Fields::new(),
            error: None,
        }
    }

    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_logger(mut self, logger: impl Into<String>) -> Self {
        self.logger = logger.into();
        self
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.fields.get(CORRELATION_ID_KEY).and_then(Value::as_str)
    }

    /// Merge the current unit's context with `event_fields`, inject the
    /// correlation id, redact and truncate.
    ///
    /// Later sources override earlier ones: ambient bindings, then the context
    /// stack, then event fields, then the correlation id.
    pub fn assemble(
        level: LogLevel,
        message: impl Into<String>,
        callsite: CallSite,
        event_fields: Fields,
        sanitizer: Option<&Sanitizer>,
        max_value_length: usize,
    ) -> Self {
        let mut fields = effective_context();
        fields.extend(event_fields);
        inject_correlation_id(&mut fields);

        let mut fields = match sanitizer {
            Some(sanitizer) => sanitizer.sanitize_dict(&fields),
            None => fields,
        };
        truncate_values(&mut fields, max_value_length);

        Self::new(level, message, callsite).with_fields(fields)
    }
}

/// Ambient bindings overlaid with the flattened context stack.
pub fn effective_context() -> Fields {
    try_read(|state| {
        let mut fields = state.ambient.clone();
        fields.extend(state.stack.peek());
        fields
    })
    .unwrap_or_default()
}

/// Cut every string longer than `max_len` bytes, at a char boundary.
pub fn truncate_values(fields: &mut Fields, max_len: usize) {
    for value in fields.values_mut() {
        truncate_value(value, max_len);
    }
}

fn truncate_value(value: &mut Value, max_len: usize) {
    match value {
        Value::String(text) if text.len() > max_len => {
            let mut end = max_len;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
            text.push_str(TRUNCATION_SUFFIX);
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| truncate_value(item, max_len)),
        Value::Object(map) => truncate_values(map, max_len),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::SensitiveFieldSet;
    use crate::config::PrivacyConfig;
    use crate::context::{bind_context, log_context};
    use crate::correlation::set_correlation_id;
    use crate::fields;
    use crate::scope::run_isolated;
    use serde_json::json;
    use std::sync::Arc;

    fn sanitizer() -> Sanitizer {
        Sanitizer::new(Arc::new(
            SensitiveFieldSet::compile(&PrivacyConfig::default()).0,
        ))
    }

    fn callsite() -> CallSite {
        CallSite::new("orders", Some("src/orders.rs"), Some(12)).with_function("place")
    }

    #[test]
    fn test_assembly_precedence() {
        run_isolated(|| {
            bind_context(fields! { tenant = "ambient", region = "eu" });
            let _outer = log_context(fields! { tenant = "stack", user = "u-1" }).unwrap();
            set_correlation_id("c-1");

            let record = LogRecord::assemble(
                LogLevel::Info,
                "placed",
                callsite(),
                fields! { user = "event", correlation_id = "from-event" },
                None,
                4096,
            );

            assert_eq!(
                Value::Object(record.fields.clone()),
                json!({
                    "tenant": "stack",
                    "region": "eu",
                    "user": "event",
                    "correlation_id": "c-1"
                })
            );
            assert_eq!(record.correlation_id(), Some("c-1"));
        });
    }

    #[test]
    fn test_assembly_redacts_merged_fields() {
        run_isolated(|| {
            let _ctx = log_context(fields! { api_key = "k-123" }).unwrap();

            let record = LogRecord::assemble(
                LogLevel::Warn,
                "retrying",
                callsite(),
                fields! { password = "hunter2", attempt = 2 },
                Some(&sanitizer()),
                4096,
            );

            assert_eq!(record.fields["api_key"], json!("[REDACTED]"));
            assert_eq!(record.fields["password"], json!("[REDACTED]"));
            assert_eq!(record.fields["attempt"], json!(2));
            assert!(record.correlation_id().is_none());
        });
    }

    #[test]
    fn test_truncate_values() {
        let mut fields = fields! {
            short = "ok",
            long = "abcdefghij",
            nested = json!({"items": ["0123456789"]}),
            unicode = "ééééé"
        };

        truncate_values(&mut fields, 5);

        assert_eq!(fields["short"], json!("ok"));
        assert_eq!(fields["long"], json!("abcde...[truncated]"));
        assert_eq!(fields["nested"]["items"][0], json!("01234...[truncated]"));
        assert_eq!(fields["unicode"], json!("éé...[truncated]"));
    }

    #[test]
    fn test_callsite_from_location() {
        let site = CallSite::caller();
        assert_eq!(site.module, "record");
        assert!(site.file.unwrap().ends_with("record.rs"));
        assert!(site.line.is_some());
    }

    #[test]
    fn test_error_info_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("payment declined")]
        struct Declined(#[source] std::io::Error);

        impl StructuredError for Declined {}

        let error = Declined(std::io::Error::new(std::io::ErrorKind::Other, "gateway timeout"));
        let info = ErrorInfo::from_error(&error);

        assert_eq!(info.error_type, "Declined");
        assert_eq!(info.message, "payment declined");
        assert_eq!(info.traceback, vec!["gateway timeout".to_string()]);
    }
}
