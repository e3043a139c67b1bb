//! Context stack and ambient bindings
//!
//! Each unit of work (see [`crate::scope`]) owns a [`ContextStack`] of immutable
//! [`ContextLayer`]s plus a flat ambient map. Both are folded into every record
//! emitted from that unit.

use crate::config::LogLevel;
use crate::record::CallSite;
use crate::scope::{self, try_read, with_state};
use crate::{Error, Fields, Result};
use serde_json::Value;
use std::future::Future;

/// Key carrying the stack depth on loggers handed out by [`log_context`].
pub const CONTEXT_DEPTH_KEY: &str = "context_depth";

/// One push worth of bindings. Never edited after it is pushed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextLayer(Fields);

impl ContextLayer {
    pub fn fields(&self) -> &Fields {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_fields(self) -> Fields {
        self.0
    }
}

impl From<Fields> for ContextLayer {
    fn from(fields: Fields) -> Self {
        Self(fields)
    }
}

/// How [`ContextStack::merge`] combines updates with the top layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Each updated key replaces the existing value
    #[default]
    Shallow,
    /// Nested mappings are combined key by key
    Deep,
}

/// Ordered layers of context; later layers override earlier keys.
#[derive(Debug, Clone)]
pub struct ContextStack {
    layers: Vec<ContextLayer>,
    max_depth: usize,
}

impl ContextStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            layers: Vec::new(),
            max_depth: max_depth.max(1),
        }
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth.max(1);
    }

    pub fn layers(&self) -> &[ContextLayer] {
        &self.layers
    }

    /// Push a layer, returning the new depth.
    ///
    /// Fails without modifying the stack when the maximum depth would be exceeded.
    pub fn push(&mut self, layer: ContextLayer) -> Result<usize> {
        if self.layers.len() >= self.max_depth {
            return Err(Error::ContextDepthExceeded {
                max_depth: self.max_depth,
            });
        }
        self.layers.push(layer);
        Ok(self.layers.len())
    }

    pub fn pop(&mut self) -> Option<ContextLayer> {
        self.layers.pop()
    }

    /// Drop every layer above `depth`.
    pub fn truncate(&mut self, depth: usize) {
        self.layers.truncate(depth);
    }

    /// Flattened effective context.
    pub fn peek(&self) -> Fields {
        let mut effective = Fields::new();
        for layer in &self.layers {
            for (key, value) in layer.fields() {
                effective.insert(key.clone(), value.clone());
            }
        }
        effective
    }

    /// Merge `updates` into the top layer, or push them as the first layer.
    ///
    /// The top layer is replaced by a merged copy; layers below it are untouched.
    pub fn merge(&mut self, updates: Fields, strategy: MergeStrategy) {
        let Some(top) = self.layers.pop() else {
            self.layers.push(ContextLayer(updates));
            return;
        };

        let mut merged = top.into_fields();
        match strategy {
            MergeStrategy::Shallow => {
                for (key, value) in updates {
                    merged.insert(key, value);
                }
            }
            MergeStrategy::Deep => deep_merge(&mut merged, updates),
        }
        self.layers.push(ContextLayer(merged));
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_CONTEXT_DEPTH)
    }
}

fn deep_merge(target: &mut Fields, updates: Fields) {
    for (key, incoming) in updates {
        if let Value::Object(incoming) = incoming {
            if let Some(Value::Object(existing)) = target.get_mut(&key) {
                deep_merge(existing, incoming);
                continue;
            }
            target.insert(key, Value::Object(incoming));
        } else {
            target.insert(key, incoming);
        }
    }
}

/// Push a layer onto the current unit's stack, returning the new depth.
///
/// The limit is the one configured at push time. Fails with
/// [`Error::System`] on a tokio task outside any unit of work.
pub fn push_context(bindings: Fields) -> Result<usize> {
    if scope::is_detached() {
        return Err(Error::System {
            message: "context pushed from a tokio task outside any unit of work".to_string(),
        });
    }

    let max_depth = scope::max_context_depth();
    let pushed = with_state(|state| {
        state.stack.set_max_depth(max_depth);
        state.stack.push(ContextLayer(bindings))
    });
    if let Err(Error::ContextDepthExceeded { max_depth }) = &pushed {
        crate::metrics::record_context_depth_exceeded();
        tracing::error!(
            telemetry.event = "context_depth_exceeded",
            max_depth = *max_depth,
            "Context stack depth exceeded"
        );
    }
    pushed
}

/// Remove and return the top layer of the current unit's stack.
pub fn pop_context() -> Option<ContextLayer> {
    with_state(|state| state.stack.pop())
}

/// Effective context of the current unit's stack.
pub fn peek_context() -> Fields {
    try_read(|state| state.stack.peek()).unwrap_or_default()
}

/// Merge into the top layer of the current unit's stack.
pub fn merge_context(updates: Fields, strategy: MergeStrategy) {
    with_state(|state| state.stack.merge(updates, strategy));
}

/// Current depth of the current unit's stack.
pub fn context_depth() -> usize {
    try_read(|state| state.stack.depth()).unwrap_or(0)
}

/// Bind long-lived keys on the current unit's ambient context.
pub fn bind_context(bindings: Fields) {
    with_state(|state| {
        for (key, value) in bindings {
            state.ambient.insert(key, value);
        }
    });
}

/// Remove specific ambient keys.
pub fn unbind_context<I, K>(keys: I)
where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    with_state(|state| {
        for key in keys {
            state.ambient.remove(key.as_ref());
        }
    });
}

/// Copy of the current unit's ambient context.
pub fn get_context() -> Fields {
    try_read(|state| state.ambient.clone()).unwrap_or_default()
}

/// Remove every ambient binding.
pub fn clear_context() {
    with_state(|state| state.ambient.clear());
}

/// Logger carrying a snapshot of bound fields.
#[derive(Debug, Clone, Default)]
pub struct BoundLogger {
    fields: Fields,
}

impl BoundLogger {
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// New logger with `extra` bound on top of these fields.
    pub fn bind(&self, extra: Fields) -> Self {
        let mut fields = self.fields.clone();
        fields.extend(extra);
        Self { fields }
    }

    /// Emit through the installed pipeline with the bound fields and `extra`.
    #[track_caller]
    pub fn log(&self, level: LogLevel, message: &str, extra: Fields) {
        let mut fields = self.fields.clone();
        fields.extend(extra);
        crate::pipeline::emit_at(CallSite::caller(), level, message, fields);
    }

    #[track_caller]
    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, Fields::new());
    }

    #[track_caller]
    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, Fields::new());
    }

    #[track_caller]
    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, Fields::new());
    }

    #[track_caller]
    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message, Fields::new());
    }

    #[track_caller]
    pub fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message, Fields::new());
    }
}

/// Pops its layer when dropped, on normal exit and during unwinding alike.
#[must_use = "the context layer is popped as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    depth: usize,
    logger: BoundLogger,
}

impl ContextGuard {
    /// Logger bound with the effective context and `context_depth`.
    pub fn logger(&self) -> &BoundLogger {
        &self.logger
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let depth = self.depth;
        with_state(|state| state.stack.truncate(depth - 1));
    }
}

/// Push a layer for the lifetime of the returned guard.
pub fn log_context(bindings: Fields) -> Result<ContextGuard> {
    let depth = push_context(bindings)?;
    let mut fields = peek_context();
    fields.insert(CONTEXT_DEPTH_KEY.to_string(), Value::from(depth));

    Ok(ContextGuard {
        depth,
        logger: BoundLogger::new(fields),
    })
}

/// Run `f` with a layer pushed; the layer is popped however `f` exits.
pub fn with_context<R>(bindings: Fields, f: impl FnOnce(&BoundLogger) -> R) -> Result<R> {
    let guard = log_context(bindings)?;
    Ok(f(guard.logger()))
}

/// Async form of [`with_context`]; the layer stays pushed until the future completes.
pub async fn with_context_async<F, Fut>(bindings: Fields, f: F) -> Result<Fut::Output>
where
    F: FnOnce(BoundLogger) -> Fut,
    Fut: Future,
{
    let guard = log_context(bindings)?;
    let output = f(guard.logger().clone()).await;
    drop(guard);
    Ok(output)
}
