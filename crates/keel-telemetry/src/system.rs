//! Telemetry system initialization

use crate::{
    classifier,
    config::{LogFormat, TelemetryConfig},
    filters::{dependency_filter, TelemetryFilter},
    metrics,
    pipeline::{self, Pipeline, PipelineLayer},
    scope, Error, Result,
};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::FilterExt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Entry point that applies a [`TelemetryConfig`] to the process
pub struct TelemetrySystem;

/// Keeps the background writer alive; pending records are flushed on drop.
#[must_use = "dropping the guard stops asynchronous log emission"]
pub struct TelemetryGuard {
    _worker: Option<WorkerGuard>,
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryGuard")
            .field("async_emission", &self._worker.is_some())
            .finish()
    }
}

impl TelemetrySystem {
    /// Apply `config` and install the global `tracing` subscriber.
    pub async fn init(config: TelemetryConfig) -> Result<TelemetryGuard> {
        let guard = Self::configure(&config)?;

        Registry::default()
            .with(Self::build_env_filter(&config))
            .with(
                PipelineLayer::installed()
                    .with_filter(TelemetryFilter::new().and(dependency_filter())),
            )
            .try_init()
            .map_err(|e| Error::System {
                message: format!("Failed to initialize tracing subscriber: {}", e),
            })?;

        tracing::info!(
            telemetry.event = "system_initialized",
            telemetry.version = env!("CARGO_PKG_VERSION"),
            format = ?pipeline::current().format(),
            "Telemetry system initialized"
        );

        Ok(guard)
    }

    /// Apply `config` without touching the `tracing` subscriber.
    ///
    /// Reloads the sensitive field set, sets the context depth limit (applied
    /// to the next push in every unit of work) and installs a fresh pipeline.
    pub fn configure(config: &TelemetryConfig) -> Result<TelemetryGuard> {
        config.validate()?;

        classifier::reload(config.privacy.clone());
        scope::set_max_context_depth(config.context.max_depth);
        metrics::describe();

        let (pipeline, worker) = Self::build_pipeline(config);
        pipeline::install(pipeline);

        Ok(TelemetryGuard { _worker: worker })
    }

    /// Re-apply a changed configuration at runtime.
    pub async fn reload(config: TelemetryConfig) -> Result<TelemetryGuard> {
        let guard = Self::configure(&config)?;

        tracing::info!(
            telemetry.event = "config_updated",
            config.logging.level = %config.logging.level,
            config.logging.format = ?config.logging.format,
            "Telemetry configuration updated"
        );

        Ok(guard)
    }

    fn build_pipeline(config: &TelemetryConfig) -> (Pipeline, Option<WorkerGuard>) {
        let pipeline = Pipeline::from_config(config);
        let to_stdout = pipeline.format() != LogFormat::Console;

        if config.logging.async_emission {
            let (writer, worker) = if to_stdout {
                tracing_appender::non_blocking(std::io::stdout())
            } else {
                tracing_appender::non_blocking(std::io::stderr())
            };
            (pipeline.with_writer(writer), Some(worker))
        } else if to_stdout {
            (pipeline.with_writer(std::io::stdout), None)
        } else {
            (pipeline, None)
        }
    }

    /// Level filter from the configuration; `RUST_LOG` overrides it.
    fn build_env_filter(config: &TelemetryConfig) -> EnvFilter {
        let level: Level = config.logging.level.into();

        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(level).into())
            .from_env_lossy()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self._worker.is_some() {
            tracing::debug!(
                telemetry.event = "system_shutdown",
                "Flushing asynchronous log writer"
            );
        }
    }
}
