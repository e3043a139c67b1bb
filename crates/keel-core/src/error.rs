use keel_telemetry::{
    emit_error, get_correlation_id, sanitize_error_context, Fields, LogLevel, StructuredError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

const ERROR_MESSAGE_KEY: &str = "error_message";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
        /// Never leaves the process
        reason: Option<String>,
    },

    #[error("Upstream service {service} failed: {message}")]
    Upstream { service: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] keel_telemetry::Error),
}

impl AppError {
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation { .. } => 422,
            Self::Conflict { .. } => 409,
            Self::Unauthorized { .. } => 401,
            Self::Upstream { .. } => 502,
            Self::Internal { .. } | Self::Io(_) | Self::Config { .. } | Self::Telemetry(_) => 500,
        }
    }

    /// Stable machine-readable code for response bodies
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation { .. } => "validation_error",
            Self::Conflict { .. } => "conflict",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Upstream { .. } => "upstream_error",
            Self::Internal { .. } | Self::Io(_) | Self::Config { .. } | Self::Telemetry(_) => {
                "internal_error"
            }
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Message safe to hand back to a client.
    ///
    /// Server-side failures are reported generically; details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Upstream { service, .. } => format!("Upstream service {} is unavailable", service),
            _ if self.is_server_error() => "An internal error occurred".to_string(),
            _ => self.to_string(),
        }
    }
}

impl StructuredError for AppError {
    fn error_type(&self) -> Cow<'_, str> {
        Cow::Borrowed(match self {
            Self::NotFound { .. } => "NotFound",
            Self::Validation { .. } => "ValidationError",
            Self::Conflict { .. } => "Conflict",
            Self::Unauthorized { .. } => "Unauthorized",
            Self::Upstream { .. } => "UpstreamError",
            Self::Internal { .. } => "InternalError",
            Self::Io(_) => "IoError",
            Self::Config { .. } => "ConfigError",
            Self::Telemetry(_) => "TelemetryError",
        })
    }

    fn attributes(&self) -> Fields {
        let mut attributes = Fields::new();
        match self {
            Self::NotFound { resource, id } => {
                attributes.insert("resource".to_string(), Value::from(resource.as_str()));
                attributes.insert("id".to_string(), Value::from(id.as_str()));
            }
            Self::Validation {
                field: Some(field), ..
            } => {
                attributes.insert("field".to_string(), Value::from(field.as_str()));
            }
            Self::Unauthorized {
                reason: Some(reason),
                ..
            } => {
                attributes.insert("_reason".to_string(), Value::from(reason.as_str()));
            }
            Self::Upstream { service, .. } => {
                attributes.insert("service".to_string(), Value::from(service.as_str()));
            }
            Self::Telemetry(inner) => return inner.attributes(),
            _ => {}
        }
        attributes
    }
}

/// Body returned to clients when a request fails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub context: Fields,
}

impl ErrorResponse {
    /// Build the response for `error` and log the failure.
    ///
    /// The context is sanitized before it is attached, so secrets in `extra`
    /// never reach the client. For 5xx errors the context carries the public
    /// message only. 4xx errors log at WARN, 5xx at ERROR.
    pub fn from_error(error: &AppError, extra: Option<&Fields>) -> Self {
        let status_code = error.status_code();
        let mut context = sanitize_error_context(error, extra);
        if error.is_server_error() {
            context.insert(
                ERROR_MESSAGE_KEY.to_string(),
                Value::String(error.public_message()),
            );
        }

        let level = if error.is_server_error() {
            LogLevel::Error
        } else {
            LogLevel::Warn
        };
        emit_error!(
            level,
            "Request failed",
            error,
            status_code = status_code,
            error_code = error.error_code(),
        );

        Self {
            error: error.error_code().to_string(),
            message: error.public_message(),
            status_code,
            correlation_id: get_correlation_id().map(|id| id.to_string()),
            context,
        }
    }
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        Self::from_error(error, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_telemetry::{
        fields,
        pipeline::{self, MemoryWriter, Pipeline},
        scope::run_isolated,
        set_correlation_id, LogFormat,
    };
    use serde_json::json;
    use serial_test::serial;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::not_found("order", "o-1").status_code(), 404);
        assert_eq!(AppError::validation("bad").status_code(), 422);
        assert_eq!(
            AppError::Conflict {
                message: "dup".into()
            }
            .status_code(),
            409
        );
        assert_eq!(
            AppError::Unauthorized {
                message: "no".into(),
                reason: None
            }
            .status_code(),
            401
        );
        assert_eq!(
            AppError::Upstream {
                service: "billing".into(),
                message: "timeout".into()
            }
            .status_code(),
            502
        );
        assert_eq!(AppError::internal("boom").status_code(), 500);
        assert_eq!(
            AppError::from(keel_telemetry::Error::ContextDepthExceeded { max_depth: 10 })
                .status_code(),
            500
        );
    }

    #[test]
    fn test_private_attributes_stay_out_of_context() {
        let error = AppError::Unauthorized {
            message: "invalid credentials".into(),
            reason: Some("password mismatch for alice".into()),
        };

        let context = sanitize_error_context(&error, None);
        assert_eq!(context["error_type"], "Unauthorized");
        assert!(context.get("error_attributes").is_none());
        assert!(!serde_json::to_string(&context)
            .unwrap()
            .contains("password mismatch"));
    }

    #[test]
    fn test_public_message_hides_server_details() {
        let error = AppError::internal("db password rejected for user admin");
        assert_eq!(error.public_message(), "An internal error occurred");

        let error = AppError::not_found("order", "o-7");
        assert_eq!(error.public_message(), "order not found: o-7");
    }

    #[test]
    #[serial]
    fn test_error_response_redacts_and_logs() {
        let sink = MemoryWriter::new();
        pipeline::install(Pipeline::new(LogFormat::Json).with_writer(sink.clone()));

        let response = run_isolated(|| {
            set_correlation_id("resp-1");
            ErrorResponse::from_error(
                &AppError::not_found("order", "o-1"),
                Some(&fields! { path = "/orders/o-1", api_key = "sk-123" }),
            )
        });
        pipeline::install(Pipeline::default());

        assert_eq!(response.status_code, 404);
        assert_eq!(response.error, "not_found");
        assert_eq!(response.correlation_id.as_deref(), Some("resp-1"));
        assert_eq!(response.context["path"], "/orders/o-1");
        assert_eq!(response.context["api_key"], "[REDACTED]");
        assert_eq!(response.context["error_message"], "order not found: o-1");
        assert_eq!(
            response.context["error_attributes"],
            json!({"resource": "order", "id": "o-1"})
        );

        let logged: Vec<Value> = sink
            .lines()
            .iter()
            .map(|line| serde_json::from_str::<Value>(line).unwrap())
            .filter(|value| value["correlation_id"] == "resp-1")
            .collect();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0]["level"], "WARNING");
        assert_eq!(logged[0]["status_code"], 404);
        assert_eq!(logged[0]["exception"]["type"], "NotFound");
        assert_eq!(logged[0]["module"], "keel_core::error");
    }

    #[test]
    #[serial]
    fn test_server_error_context_hides_details() {
        let sink = MemoryWriter::new();
        pipeline::install(Pipeline::new(LogFormat::Json).with_writer(sink.clone()));

        let response = run_isolated(|| {
            set_correlation_id("resp-3");
            ErrorResponse::from_error(
                &AppError::internal("db password rejected for user admin"),
                None,
            )
        });
        pipeline::install(Pipeline::default());

        assert_eq!(response.message, "An internal error occurred");
        assert_eq!(response.context["error_message"], "An internal error occurred");
        assert_eq!(response.context["error_type"], "InternalError");
        assert!(!serde_json::to_string(&response)
            .unwrap()
            .contains("db password rejected"));

        let logged: Vec<Value> = sink
            .lines()
            .iter()
            .map(|line| serde_json::from_str::<Value>(line).unwrap())
            .filter(|value| value["correlation_id"] == "resp-3")
            .collect();
        assert_eq!(logged.len(), 1);
        assert!(logged[0]["exception"]["value"]
            .as_str()
            .unwrap()
            .contains("db password rejected"));
    }

    #[test]
    #[serial]
    fn test_server_errors_log_at_error() {
        let sink = MemoryWriter::new();
        pipeline::install(Pipeline::new(LogFormat::Json).with_writer(sink.clone()));

        let response = run_isolated(|| {
            set_correlation_id("resp-2");
            ErrorResponse::from(&AppError::Upstream {
                service: "billing".into(),
                message: "connect timeout".into(),
            })
        });
        pipeline::install(Pipeline::default());

        assert_eq!(response.status_code, 502);
        assert_eq!(response.message, "Upstream service billing is unavailable");

        let logged: Vec<Value> = sink
            .lines()
            .iter()
            .map(|line| serde_json::from_str::<Value>(line).unwrap())
            .filter(|value| value["correlation_id"] == "resp-2")
            .collect();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0]["level"], "ERROR");
        assert_eq!(logged[0]["error_attributes"]["service"], "billing");
    }

    #[test]
    fn test_response_without_correlation_id_omits_field() {
        let response = run_isolated(|| ErrorResponse::from_error(&AppError::validation("x"), None));
        let body = serde_json::to_value(&response).unwrap();
        assert!(body.get("correlation_id").is_none());
        assert_eq!(body["status_code"], 422);
    }
}
