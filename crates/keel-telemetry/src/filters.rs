//! Filters for the pipeline layer

use tracing::{Metadata, Subscriber};
use tracing_subscriber::{
    filter::FilterFn,
    layer::{Context, Filter},
};

/// Targets whose events are clipped to WARN and above
const NOISY_TARGETS: &[&str] = &[
    "hyper",
    "h2",
    "tower",
    "reqwest",
    "rustls",
    "tokio_util",
    "want",
];

/// True for diagnostics emitted by this crate.
pub fn is_self_target(target: &str) -> bool {
    target == "keel_telemetry" || target.starts_with("keel_telemetry::")
}

/// Filter that keeps this crate's own diagnostics out of the pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryFilter;

impl TelemetryFilter {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Filter<S> for TelemetryFilter
where
    S: Subscriber,
{
    fn enabled(&self, meta: &Metadata<'_>, _ctx: &Context<'_, S>) -> bool {
        !is_self_target(meta.target())
    }

    fn callsite_enabled(&self, meta: &'static Metadata<'static>) -> tracing::subscriber::Interest {
        if is_self_target(meta.target()) {
            tracing::subscriber::Interest::never()
        } else {
            tracing::subscriber::Interest::sometimes()
        }
    }
}

/// Clip noisy third-party targets to WARN; everything else passes.
pub fn dependency_filter() -> FilterFn<impl Fn(&Metadata<'_>) -> bool> {
    FilterFn::new(|metadata: &Metadata<'_>| {
        let target = metadata.target();
        let noisy = NOISY_TARGETS.iter().any(|noisy| {
            target == *noisy
                || target
                    .strip_prefix(noisy)
                    .is_some_and(|rest| rest.starts_with("::"))
        });

        !noisy || metadata.level() <= &tracing::Level::WARN
    })
}
