//! Emission pipeline: assembly, redaction, formatting and the sink
//!
//! A [`Pipeline`] is installed process-wide by [`TelemetrySystem`](crate::TelemetrySystem)
//! and used by [`emit`], the [`emit!`](crate::emit) macro, [`BoundLogger`](crate::BoundLogger)
//! and the [`PipelineLayer`] that forwards `tracing` events.

use crate::classifier::SensitiveFieldCache;
use crate::config::{LogFormat, LogLevel, TelemetryConfig};
use crate::error_context::{error_chain, StructuredError};
use crate::filters::is_self_target;
use crate::formatters::{
    detect_format_from_env, format_or_fallback, formatter_for, FormatOptions, RecordFormatter,
};
use crate::record::{CallSite, ErrorInfo, LogRecord};
use crate::sanitization::Sanitizer;
use crate::{metrics, Fields};
use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

static INSTALLED: Lazy<ArcSwap<Pipeline>> =
    Lazy::new(|| ArcSwap::from_pointee(Pipeline::default()));

/// Assembler, formatter and sink for log records
pub struct Pipeline {
    enabled: bool,
    format: LogFormat,
    options: FormatOptions,
    formatter: Box<dyn RecordFormatter>,
    level: LogLevel,
    sanitize: bool,
    cache: Option<Arc<SensitiveFieldCache>>,
    max_value_length: usize,
    writer: BoxMakeWriter,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("enabled", &self.enabled)
            .field("format", &self.format)
            .field("level", &self.level)
            .field("sanitize", &self.sanitize)
            .field("max_value_length", &self.max_value_length)
            .finish_non_exhaustive()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(LogFormat::Console)
    }
}

impl Pipeline {
    /// Pipeline writing `format` to stderr at INFO with redaction on.
    pub fn new(format: LogFormat) -> Self {
        let options = FormatOptions::default();
        Self {
            enabled: true,
            format,
            formatter: formatter_for(format, options.clone()),
            options,
            level: LogLevel::Info,
            sanitize: true,
            cache: None,
            max_value_length: 4096,
            writer: BoxMakeWriter::new(io::stderr),
        }
    }

    /// Pipeline described by `config`, auto-detecting the format when unset.
    pub fn from_config(config: &TelemetryConfig) -> Self {
        let format = config
            .logging
            .format
            .unwrap_or_else(detect_format_from_env);

        Self::new(format)
            .with_options(FormatOptions {
                colorize: config.logging.colorize,
                include_location: config.logging.include_location,
                service: config.service.clone(),
            })
            .with_level(config.logging.level)
            .with_sanitize(config.privacy.sanitize_enabled)
            .with_max_value_length(config.logging.max_value_length)
            .with_enabled(config.enabled)
    }

    pub fn with_options(mut self, options: FormatOptions) -> Self {
        self.formatter = formatter_for(self.format, options.clone());
        self.options = options;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_sanitize(mut self, sanitize: bool) -> Self {
        self.sanitize = sanitize;
        self
    }

    pub fn with_max_value_length(mut self, max_value_length: usize) -> Self {
        self.max_value_length = max_value_length;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Classify with `cache` instead of the process-wide one.
    pub fn with_cache(mut self, cache: Arc<SensitiveFieldCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_writer<W>(mut self, writer: W) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        self.writer = BoxMakeWriter::new(writer);
        self
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.enabled && level >= self.level
    }

    fn sanitizer(&self) -> Option<Sanitizer> {
        if !self.sanitize {
            return None;
        }
        let cache = self
            .cache
            .as_deref()
            .unwrap_or_else(|| SensitiveFieldCache::global());
        Some(Sanitizer::from_cache(cache))
    }

    /// Build the record for an event in the current unit of work.
    pub fn assemble(
        &self,
        callsite: CallSite,
        level: LogLevel,
        message: &str,
        fields: Fields,
    ) -> LogRecord {
        LogRecord::assemble(
            level,
            message,
            callsite,
            fields,
            self.sanitizer().as_ref(),
            self.max_value_length,
        )
    }

    /// Render a record without writing it.
    pub fn render(&self, record: &LogRecord) -> String {
        let (line, fell_back) = format_or_fallback(self.formatter.as_ref(), record);
        if fell_back {
            metrics::record_format_fallback();
        }
        line
    }

    /// Render and write one record.
    pub fn write(&self, record: &LogRecord) {
        let mut line = self.render(record);
        line.push('\n');

        let mut writer = self.writer.make_writer();
        if let Err(error) = writer.write_all(line.as_bytes()) {
            tracing::trace!(error = %error, "Log sink write failed");
            return;
        }
        metrics::record_written(record.level);
    }

    /// Emit an event from `callsite` with the current unit's context.
    pub fn emit_at(&self, callsite: CallSite, level: LogLevel, message: &str, fields: Fields) {
        if !self.enabled(level) {
            metrics::record_suppressed();
            return;
        }
        let record = self.assemble(callsite, level, message, fields);
        self.write(&record);
    }

    #[track_caller]
    pub fn emit(&self, level: LogLevel, message: &str, fields: Fields) {
        self.emit_at(CallSite::caller(), level, message, fields);
    }

    /// Emit an event carrying `error` as the record's exception.
    ///
    /// Public attributes of the error are attached under `error_attributes`
    /// and redacted with the rest of the record.
    pub fn emit_error_at<E: StructuredError>(
        &self,
        callsite: CallSite,
        level: LogLevel,
        message: &str,
        error: &E,
        mut fields: Fields,
    ) {
        if !self.enabled(level) {
            metrics::record_suppressed();
            return;
        }

        let attributes: Fields = error
            .attributes()
            .into_iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .collect();
        if !attributes.is_empty() {
            fields.insert("error_attributes".to_string(), Value::Object(attributes));
        }

        let record = self
            .assemble(callsite, level, message, fields)
            .with_error(ErrorInfo::from_error(error));
        self.write(&record);
    }

    #[track_caller]
    pub fn emit_error<E: StructuredError>(
        &self,
        level: LogLevel,
        message: &str,
        error: &E,
        fields: Fields,
    ) {
        self.emit_error_at(CallSite::caller(), level, message, error, fields);
    }
}

/// Replace the process-wide pipeline.
pub fn install(pipeline: Pipeline) {
    INSTALLED.store(Arc::new(pipeline));
}

/// The process-wide pipeline.
pub fn current() -> Arc<Pipeline> {
    INSTALLED.load_full()
}

/// Emit through the installed pipeline.
#[track_caller]
pub fn emit(level: LogLevel, message: &str, fields: Fields) {
    emit_at(CallSite::caller(), level, message, fields);
}

pub fn emit_at(callsite: CallSite, level: LogLevel, message: &str, fields: Fields) {
    INSTALLED.load().emit_at(callsite, level, message, fields);
}

/// Emit an error record through the installed pipeline.
#[track_caller]
pub fn emit_error<E: StructuredError>(level: LogLevel, message: &str, error: &E, fields: Fields) {
    emit_error_at(CallSite::caller(), level, message, error, fields);
}

pub fn emit_error_at<E: StructuredError>(
    callsite: CallSite,
    level: LogLevel,
    message: &str,
    error: &E,
    fields: Fields,
) {
    INSTALLED
        .load()
        .emit_error_at(callsite, level, message, error, fields);
}

/// `tracing` layer that routes events through a [`Pipeline`].
///
/// The innermost span's name becomes the record's function.
#[derive(Debug, Clone, Default)]
pub struct PipelineLayer {
    pipeline: Option<Arc<Pipeline>>,
}

impl PipelineLayer {
    /// Layer bound to a fixed pipeline.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline: Some(pipeline),
        }
    }

    /// Layer following whatever pipeline is installed at event time.
    pub fn installed() -> Self {
        Self { pipeline: None }
    }

    fn pipeline(&self) -> Arc<Pipeline> {
        match &self.pipeline {
            Some(pipeline) => Arc::clone(pipeline),
            None => current(),
        }
    }
}

impl<S> Layer<S> for PipelineLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_self_target(metadata.target()) {
            return;
        }

        let pipeline = self.pipeline();
        let level = LogLevel::from(*metadata.level());
        if !pipeline.enabled(level) {
            metrics::record_suppressed();
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut callsite = CallSite::new(
            metadata.module_path().unwrap_or(metadata.target()),
            metadata.file(),
            metadata.line(),
        );
        if let Some(span) = ctx.event_span(event) {
            callsite = callsite.with_function(span.name());
        }

        let mut record = pipeline
            .assemble(callsite, level, &visitor.message, visitor.fields)
            .with_logger(metadata.target());
        if let Some(error) = visitor.error {
            record = record.with_error(error);
        }
        pipeline.write(&record);
    }
}

/// Collects event fields into a [`Fields`] map
#[derive(Debug, Default)]
struct EventVisitor {
    message: String,
    fields: Fields,
    error: Option<ErrorInfo>,
}

impl Visit for EventVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), json!(value));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields
            .insert(field.name().to_string(), json!(value.to_string()));
        self.error = Some(ErrorInfo {
            error_type: field.name().to_string(),
            message: value.to_string(),
            traceback: error_chain(value),
        });
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .insert(field.name().to_string(), json!(format!("{:?}", value)));
        }
    }
}

/// In-memory sink, mainly for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .map(|buffer| String::from_utf8_lossy(&buffer).into_owned())
            .unwrap_or_default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory writer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for MemoryWriter {
    type Writer = MemoryWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
