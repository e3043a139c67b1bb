//! Pipeline counters
//!
//! Counters go through the `metrics` facade; nothing is exported unless the
//! host installs a recorder.

use crate::config::LogLevel;
use metrics::{counter, describe_counter, Unit};

/// Records written by the pipeline, labelled by level
pub const LOG_RECORDS: &str = "keel.log.records";
/// Records rendered with the fallback layout after a formatter error
pub const FORMAT_FALLBACKS: &str = "keel.log.format_fallbacks";
/// Records dropped below the level threshold
pub const SUPPRESSED: &str = "keel.log.suppressed";
/// Context pushes rejected at the maximum depth
pub const CONTEXT_DEPTH_EXCEEDED: &str = "keel.context.depth_exceeded";

/// Register descriptions with the installed recorder.
pub fn describe() {
    describe_counter!(LOG_RECORDS, Unit::Count, "Log records written");
    describe_counter!(
        FORMAT_FALLBACKS,
        Unit::Count,
        "Log records rendered with the fallback layout"
    );
    describe_counter!(SUPPRESSED, Unit::Count, "Log records below the level threshold");
    describe_counter!(
        CONTEXT_DEPTH_EXCEEDED,
        Unit::Count,
        "Context pushes rejected at the maximum depth"
    );
}

pub fn record_written(level: LogLevel) {
    counter!(LOG_RECORDS, "level" => level.as_str()).increment(1);
}

pub fn record_format_fallback() {
    counter!(FORMAT_FALLBACKS).increment(1);
}

pub fn record_suppressed() {
    counter!(SUPPRESSED).increment(1);
}

pub fn record_context_depth_exceeded() {
    counter!(CONTEXT_DEPTH_EXCEEDED).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::{
        Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString,
    };
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Recorder that keeps counter totals in memory, keyed by metric name.
    ///
    /// Gauges and histograms are accepted and discarded.
    #[derive(Debug, Clone, Default)]
    struct CounterRecorder {
        counters: Arc<Mutex<HashMap<String, u64>>>,
    }

    impl CounterRecorder {
        fn new() -> Self {
            Self::default()
        }

        /// Total for `name` across all label sets.
        fn get(&self, name: &str) -> u64 {
            self.counters
                .lock()
                .map(|counters| counters.get(name).copied().unwrap_or(0))
                .unwrap_or(0)
        }

        fn snapshot(&self) -> HashMap<String, u64> {
            self.counters
                .lock()
                .map(|counters| counters.clone())
                .unwrap_or_default()
        }
    }

    struct NamedCounter {
        name: String,
        counters: Arc<Mutex<HashMap<String, u64>>>,
    }

    impl CounterFn for NamedCounter {
        fn increment(&self, value: u64) {
            if let Ok(mut counters) = self.counters.lock() {
                *counters.entry(self.name.clone()).or_insert(0) += value;
            }
        }

        fn absolute(&self, value: u64) {
            if let Ok(mut counters) = self.counters.lock() {
                let total = counters.entry(self.name.clone()).or_insert(0);
                *total = (*total).max(value);
            }
        }
    }

    impl Recorder for CounterRecorder {
        fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

        fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

        fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

        fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
            Counter::from_arc(Arc::new(NamedCounter {
                name: key.name().to_string(),
                counters: Arc::clone(&self.counters),
            }))
        }

        fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_counter_recorder_sums_labels() {
        let recorder = CounterRecorder::new();

        metrics::with_local_recorder(&recorder, || {
            record_written(LogLevel::Info);
            record_written(LogLevel::Error);
            record_format_fallback();
            describe();
        });

        assert_eq!(recorder.get(LOG_RECORDS), 2);
        assert_eq!(recorder.get(FORMAT_FALLBACKS), 1);
        assert_eq!(recorder.get(SUPPRESSED), 0);
        assert_eq!(recorder.snapshot().len(), 2);
    }

    #[test]
    fn test_counters_without_recorder_are_noops() {
        record_suppressed();
        record_context_depth_exceeded();
    }
}
