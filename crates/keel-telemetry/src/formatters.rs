//! Record formatters for console, generic JSON and cloud logging schemas

use crate::config::{LogFormat, LogLevel, ServiceConfig};
use crate::correlation::CORRELATION_ID_KEY;
use crate::record::LogRecord;
use crate::{Error, Fields, Result};
use chrono::SecondsFormat;
use serde_json::{json, Value};
use std::fmt::{self, Write as _};

const REQUEST_ID_KEY: &str = "request_id";

/// Context keys the console format renders first, in this order
const CONSOLE_PRIORITY_KEYS: &[&str] = &[
    CORRELATION_ID_KEY,
    REQUEST_ID_KEY,
    "method",
    "path",
    "status_code",
    "duration_ms",
    "client_host",
    "user_agent",
];

const ERROR_REPORTING_TYPE: &str =
    "type.googleapis.com/google.devtools.clouderrorreporting.v1beta1.ReportedErrorEvent";

const ANSI_RESET: &str = "\x1b[0m";

/// Renders one record into a single output line (without trailing newline).
pub trait RecordFormatter: Send + Sync + fmt::Debug {
    fn format(&self, record: &LogRecord) -> Result<String>;
}

/// Options shared by every formatter
#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub colorize: bool,
    pub include_location: bool,
    pub service: ServiceConfig,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            colorize: false,
            include_location: true,
            service: ServiceConfig::default(),
        }
    }
}

/// Build the formatter for `format`.
pub fn formatter_for(format: LogFormat, options: FormatOptions) -> Box<dyn RecordFormatter> {
    match format {
        LogFormat::Console => Box::new(ConsoleFormatter { options }),
        LogFormat::Json => Box::new(JsonFormatter { options }),
        LogFormat::Gcp => Box::new(GcpFormatter { options }),
        LogFormat::Aws => Box::new(AwsFormatter { options }),
    }
}

/// Pick a format from platform markers in the environment.
pub fn detect_format<F>(lookup: F) -> LogFormat
where
    F: Fn(&str) -> Option<String>,
{
    let present = |name: &str| lookup(name).is_some_and(|value| !value.is_empty());

    if present("K_SERVICE") {
        LogFormat::Gcp
    } else if ["AWS_LAMBDA_FUNCTION_NAME", "AWS_EXECUTION_ENV", "ECS_CONTAINER_METADATA_URI"]
        .iter()
        .any(|name| present(name))
    {
        LogFormat::Aws
    } else if ["DYNO", "RENDER_INSTANCE_ID", "FLY_ALLOC_ID"]
        .iter()
        .any(|name| present(name))
    {
        LogFormat::Json
    } else {
        LogFormat::Console
    }
}

/// [`detect_format`] over the process environment.
pub fn detect_format_from_env() -> LogFormat {
    detect_format(|name| std::env::var(name).ok())
}

/// Format `record`, falling back to the fixed console layout on failure.
///
/// The flag reports whether the fallback was used.
pub fn format_or_fallback(formatter: &dyn RecordFormatter, record: &LogRecord) -> (String, bool) {
    match formatter.format(record) {
        Ok(line) => (line, false),
        Err(error) => {
            tracing::trace!(error = %error, "Record formatting failed, using fallback layout");
            (fallback_line(record), true)
        }
    }
}

/// Fixed layout used when a formatter fails.
pub fn fallback_line(record: &LogRecord) -> String {
    format!(
        "{} | {:<8} | {}:{}:{} - {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level.as_str(),
        record.callsite.module,
        record.callsite.function.unwrap_or("-"),
        record.callsite.line.unwrap_or(0),
        record.message
    )
}

fn visible_fields(fields: &Fields) -> impl Iterator<Item = (&String, &Value)> {
    fields.iter().filter(|(key, _)| !key.starts_with('_'))
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn timestamp(record: &LogRecord) -> String {
    record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn is_error_record(record: &LogRecord) -> bool {
    record.level >= LogLevel::Error || record.error.is_some()
}

/// Human-oriented single line
#[derive(Debug, Clone, Default)]
pub struct ConsoleFormatter {
    options: FormatOptions,
}

impl ConsoleFormatter {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }

    fn status_colour(status: &Value) -> Option<&'static str> {
        match status.as_u64()? {
            200..=299 => Some("\x1b[32m"),
            300..=399 => Some("\x1b[36m"),
            400..=499 => Some("\x1b[33m"),
            500..=599 => Some("\x1b[31m"),
            _ => None,
        }
    }

    fn write_segment(&self, out: &mut String, key: &str, value: &Value) -> fmt::Result {
        let colour = if self.options.colorize && key == "status_code" {
            Self::status_colour(value)
        } else {
            None
        };
        match colour {
            Some(colour) => write!(out, "[{}={}{}{}] ", key, colour, plain(value), ANSI_RESET),
            None => write!(out, "[{}={}] ", key, plain(value)),
        }
    }

    fn render(&self, record: &LogRecord) -> std::result::Result<String, fmt::Error> {
        let mut out = String::new();
        write!(
            out,
            "{} | {:<8} | ",
            record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level.as_str()
        )?;
        if self.options.include_location {
            write!(
                out,
                "{}:{}:{}",
                record.callsite.module,
                record.callsite.function.unwrap_or("-"),
                record.callsite.line.unwrap_or(0)
            )?;
        } else {
            out.push_str(record.callsite.module);
        }
        out.push_str(" - ");

        for key in CONSOLE_PRIORITY_KEYS {
            if let Some(value) = record.fields.get(*key) {
                self.write_segment(&mut out, key, value)?;
            }
        }
        for (key, value) in visible_fields(&record.fields) {
            if !CONSOLE_PRIORITY_KEYS.contains(&key.as_str()) {
                self.write_segment(&mut out, key, value)?;
            }
        }

        out.push_str(&record.message);
        if let Some(error) = &record.error {
            write!(out, " | {}: {}", error.error_type, error.message)?;
        }
        Ok(out)
    }
}

impl RecordFormatter for ConsoleFormatter {
    fn format(&self, record: &LogRecord) -> Result<String> {
        self.render(record).map_err(|_| Error::System {
            message: "console record formatting failed".to_string(),
        })
    }
}

/// Generic structured JSON object per line
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    options: FormatOptions,
}

impl JsonFormatter {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }

    fn base_object(&self, record: &LogRecord) -> Fields {
        let mut object = Fields::new();
        object.insert("timestamp".into(), json!(timestamp(record)));
        object.insert("level".into(), json!(record.level.as_str()));
        object.insert("message".into(), json!(record.message));
        object.insert("logger".into(), json!(record.logger));
        object.insert("module".into(), json!(record.callsite.module));
        if self.options.include_location {
            object.insert("function".into(), json!(record.callsite.function));
            object.insert("line".into(), json!(record.callsite.line));
        }
        object
    }
}

/// Merge context into `object`; keys already present win.
fn merge_context<'a>(object: &mut Fields, context: impl Iterator<Item = (&'a String, &'a Value)>) {
    for (key, value) in context {
        if !object.contains_key(key) {
            object.insert(key.clone(), value.clone());
        }
    }
}

impl RecordFormatter for JsonFormatter {
    fn format(&self, record: &LogRecord) -> Result<String> {
        let mut object = self.base_object(record);
        merge_context(&mut object, visible_fields(&record.fields));

        if let Some(error) = &record.error {
            object.insert(
                "exception".into(),
                json!({
                    "type": error.error_type,
                    "value": error.message,
                    "traceback": error.traceback,
                }),
            );
        }

        Ok(serde_json::to_string(&object)?)
    }
}

/// Google Cloud Logging and Error Reporting schema
#[derive(Debug, Clone, Default)]
pub struct GcpFormatter {
    options: FormatOptions,
}

impl GcpFormatter {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }

    pub fn severity(level: LogLevel) -> &'static str {
        match level {
            LogLevel::Trace | LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// First 8 hex chars of the md5 of the error identity and emitting function.
    pub fn error_fingerprint(record: &LogRecord) -> String {
        let identity = match &record.error {
            Some(error) => error.error_type.as_str(),
            None => record.message.as_str(),
        };
        let digest = md5::compute(format!(
            "{}:{}:{}",
            identity,
            record.callsite.module,
            record.callsite.function.unwrap_or("")
        ));
        format!("{:x}", digest)[..8].to_string()
    }

    fn message(record: &LogRecord) -> String {
        match &record.error {
            Some(error) => {
                let mut message = format!("{}\n{}: {}", record.message, error.error_type, error.message);
                for cause in &error.traceback {
                    message.push_str("\nCaused by: ");
                    message.push_str(cause);
                }
                message
            }
            None => record.message.clone(),
        }
    }
}

impl RecordFormatter for GcpFormatter {
    fn format(&self, record: &LogRecord) -> Result<String> {
        let is_error = is_error_record(record);

        let mut entry = Fields::new();
        entry.insert("severity".into(), json!(Self::severity(record.level)));
        entry.insert("message".into(), json!(Self::message(record)));
        entry.insert("timestamp".into(), json!(timestamp(record)));
        if let Some(trace) = record.correlation_id() {
            entry.insert("trace".into(), json!(trace));
        }
        entry.insert(
            "serviceContext".into(),
            json!({
                "service": self.options.service.name,
                "version": self.options.service.version,
            }),
        );

        let mut labels = Fields::new();
        if let Some(request_id) = record.fields.get(REQUEST_ID_KEY) {
            labels.insert(REQUEST_ID_KEY.into(), json!(plain(request_id)));
        }
        if is_error {
            labels.insert("error_fingerprint".into(), json!(Self::error_fingerprint(record)));
        }
        if !labels.is_empty() {
            entry.insert("labels".into(), Value::Object(labels));
        }

        let payload: Fields = visible_fields(&record.fields)
            .filter(|(key, _)| key.as_str() != CORRELATION_ID_KEY && key.as_str() != REQUEST_ID_KEY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        entry.insert("jsonPayload".into(), Value::Object(payload));

        if is_error {
            let file = record.callsite.file.unwrap_or(record.callsite.module);
            let line = record.callsite.line.unwrap_or(0);
            let function = record.callsite.function.unwrap_or("");

            entry.insert("@type".into(), json!(ERROR_REPORTING_TYPE));
            entry.insert(
                "context".into(),
                json!({
                    "reportLocation": {
                        "filePath": file,
                        "lineNumber": line,
                        "functionName": function,
                    }
                }),
            );
            entry.insert(
                "sourceLocation".into(),
                json!({ "file": file, "line": line, "function": function }),
            );
        }

        Ok(serde_json::to_string(&entry)?)
    }
}

/// AWS CloudWatch schema
#[derive(Debug, Clone, Default)]
pub struct AwsFormatter {
    options: FormatOptions,
}

impl AwsFormatter {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }
}

impl RecordFormatter for AwsFormatter {
    fn format(&self, record: &LogRecord) -> Result<String> {
        let mut object = JsonFormatter::new(self.options.clone()).base_object(record);

        if let Some(trace_id) = record.correlation_id() {
            object.insert("traceId".into(), json!(trace_id));
        }
        if let Some(request_id) = record.fields.get(REQUEST_ID_KEY) {
            object.insert("requestId".into(), request_id.clone());
        }
        merge_context(
            &mut object,
            visible_fields(&record.fields).filter(|(key, _)| {
                key.as_str() != CORRELATION_ID_KEY && key.as_str() != REQUEST_ID_KEY
            }),
        );

        if let Some(error) = &record.error {
            object.insert(
                "error".into(),
                json!({
                    "type": error.error_type,
                    "message": error.message,
                    "stackTrace": error.traceback,
                }),
            );
        }

        Ok(serde_json::to_string(&object)?)
    }
}
