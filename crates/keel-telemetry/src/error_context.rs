//! Sanitized error context for logs and error responses

use crate::sanitization::Sanitizer;
use crate::Fields;
use serde_json::Value;
use std::borrow::Cow;

/// Errors that expose structured attributes to logs and error payloads.
///
/// Attributes whose name starts with an underscore are private and never leave
/// the process.
pub trait StructuredError: std::error::Error {
    /// Short type name reported as `error_type`
    fn error_type(&self) -> Cow<'_, str> {
        let full = std::any::type_name::<Self>();
        Cow::Borrowed(full.rsplit("::").next().unwrap_or(full))
    }

    /// Attribute map describing this error instance
    fn attributes(&self) -> Fields {
        Fields::new()
    }
}

/// Adapter for third-party errors that carry no structured attributes.
#[derive(Debug)]
pub struct ForeignError<'a> {
    inner: &'a (dyn std::error::Error + 'static),
    type_name: &'static str,
}

impl<'a> ForeignError<'a> {
    pub fn new<E: std::error::Error + 'static>(error: &'a E) -> Self {
        let full = std::any::type_name::<E>();
        Self {
            inner: error,
            type_name: full.rsplit("::").next().unwrap_or(full),
        }
    }
}

impl std::fmt::Display for ForeignError<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self.inner, f)
    }
}

impl std::error::Error for ForeignError<'_> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl StructuredError for ForeignError<'_> {
    fn error_type(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.type_name)
    }
}

impl StructuredError for crate::Error {
    fn error_type(&self) -> Cow<'_, str> {
        Cow::Borrowed("TelemetryError")
    }

    fn attributes(&self) -> Fields {
        let mut attributes = Fields::new();
        match self {
            crate::Error::ContextDepthExceeded { max_depth } => {
                attributes.insert("max_depth".to_string(), Value::from(*max_depth));
            }
            crate::Error::Config { .. } => {
                attributes.insert("kind".to_string(), Value::from("config"));
            }
            _ => {}
        }
        attributes
    }
}

/// Render the chain of `source()` errors, outermost first.
pub fn error_chain(error: &dyn std::error::Error) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = error.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}

impl Sanitizer {
    /// Build `{error_type, error_message, error_attributes?, ..extra}` and sanitize it.
    pub fn sanitize_error_context<E: StructuredError + ?Sized>(
        &self,
        error: &E,
        extra_context: Option<&Fields>,
    ) -> Fields {
        let mut context = Fields::new();
        context.insert(
            "error_type".to_string(),
            Value::String(error.error_type().into_owned()),
        );
        context.insert(
            "error_message".to_string(),
            Value::String(error.to_string()),
        );

        let attributes: Fields = error
            .attributes()
            .into_iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, value)| {
                let value = self.sanitize(&value, Some(name.as_str()), 1);
                (name, value)
            })
            .collect();
        if !attributes.is_empty() {
            context.insert("error_attributes".to_string(), Value::Object(attributes));
        }

        if let Some(extra) = extra_context {
            for (key, value) in extra {
                context.insert(key.clone(), value.clone());
            }
        }

        self.sanitize_dict(&context)
    }
}

/// Sanitize an error's context with the process-wide configuration.
pub fn sanitize_error_context<E: StructuredError + ?Sized>(
    error: &E,
    extra_context: Option<&Fields>,
) -> Fields {
    Sanitizer::current().sanitize_error_context(error, extra_context)
}
