//! Per-unit-of-work storage for context and correlation state
//!
//! Every request, task or thread owns one [`ScopeState`]. Async code enters a
//! unit of work with [`unit_of_work`] (fresh state) or [`inherit`]/[`spawn`]
//! (copy of the caller's state taken at spawn time); both are backed by
//! `tokio::task_local!`, so tasks that run concurrently never observe each
//! other's bindings. Code running outside any scope and outside a tokio
//! runtime falls back to a `thread_local!` state owned by the current OS thread.
//!
//! A task inside a runtime but outside any unit of work is *detached*: worker
//! threads are shared between tasks, so it gets no state at all. Reads see an
//! empty context, bindings are discarded and [`push_context`] fails.
//!
//! [`push_context`]: crate::context::push_context

use crate::context::ContextStack;
use crate::correlation::CorrelationId;
use crate::Fields;
use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::task::JoinHandle;

static MAX_CONTEXT_DEPTH: AtomicUsize = AtomicUsize::new(crate::config::DEFAULT_MAX_CONTEXT_DEPTH);
static DETACHED_REPORTED: AtomicBool = AtomicBool::new(false);

tokio::task_local! {
    static TASK_SCOPE: RefCell<ScopeState>;
}

thread_local! {
    static THREAD_SCOPE: RefCell<ScopeState> = RefCell::new(ScopeState::new());
}

/// Bindings owned by one logical unit of work.
#[derive(Debug, Clone)]
pub(crate) struct ScopeState {
    pub(crate) correlation_id: Option<CorrelationId>,
    pub(crate) stack: ContextStack,
    pub(crate) ambient: Fields,
}

impl ScopeState {
    pub(crate) fn new() -> Self {
        Self {
            correlation_id: None,
            stack: ContextStack::new(max_context_depth()),
            ambient: Fields::new(),
        }
    }
}

/// Set the maximum stack depth; checked on every push.
pub fn set_max_context_depth(depth: usize) {
    MAX_CONTEXT_DEPTH.store(depth.max(1), Ordering::Relaxed);
}

pub fn max_context_depth() -> usize {
    MAX_CONTEXT_DEPTH.load(Ordering::Relaxed)
}

fn in_task_scope() -> bool {
    TASK_SCOPE.try_with(|_| ()).is_ok()
}

/// Where the current code keeps its state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Task,
    Thread,
    Detached,
}

pub(crate) fn current_slot() -> Slot {
    if in_task_scope() {
        Slot::Task
    } else if tokio::runtime::Handle::try_current().is_ok() {
        Slot::Detached
    } else {
        Slot::Thread
    }
}

/// True when running on a tokio runtime outside any unit of work.
pub fn is_detached() -> bool {
    current_slot() == Slot::Detached
}

fn report_detached() {
    if !DETACHED_REPORTED.swap(true, Ordering::Relaxed) {
        tracing::warn!(
            telemetry.event = "detached_task",
            "Context used from a tokio task outside any unit of work; wrap it with scope::unit_of_work or scope::spawn"
        );
    }
}

/// Run `f` against the current unit's state.
///
/// Detached tasks get a throwaway state, so their writes are dropped.
/// `f` must not log: the state is mutably borrowed for its whole duration.
pub(crate) fn with_state<R>(f: impl FnOnce(&mut ScopeState) -> R) -> R {
    match current_slot() {
        Slot::Task => TASK_SCOPE.with(|cell| f(&mut cell.borrow_mut())),
        Slot::Thread => THREAD_SCOPE.with(|cell| f(&mut cell.borrow_mut())),
        Slot::Detached => {
            report_detached();
            f(&mut ScopeState::new())
        }
    }
}

/// Read the current unit's state without panicking.
///
/// Returns `None` when there is no state (detached task), when it is already
/// borrowed or when the thread is being torn down; record assembly then
/// proceeds without context.
pub(crate) fn try_read<R>(f: impl FnOnce(&ScopeState) -> R) -> Option<R> {
    match current_slot() {
        Slot::Task => TASK_SCOPE
            .try_with(|cell| cell.try_borrow().ok().map(|state| f(&state)))
            .ok()
            .flatten(),
        Slot::Thread => THREAD_SCOPE
            .try_with(|cell| cell.try_borrow().ok().map(|state| f(&state)))
            .ok()
            .flatten(),
        Slot::Detached => None,
    }
}

/// Run `fut` as a fresh unit of work with empty context and no correlation id.
pub async fn unit_of_work<F: Future>(fut: F) -> F::Output {
    TASK_SCOPE.scope(RefCell::new(ScopeState::new()), fut).await
}

/// Run `fut` as a child unit holding a copy of the caller's current state.
///
/// Bindings the child makes afterwards are invisible to the parent and to
/// sibling children.
pub fn inherit<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    let state = ScopeSnapshot::capture().state;
    TASK_SCOPE.scope(RefCell::new(state), fut)
}

/// Spawn a tokio task as a child unit of the current one.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(inherit(fut))
}

/// Run `f` synchronously as a fresh unit of work.
pub fn run_isolated<R>(f: impl FnOnce() -> R) -> R {
    TASK_SCOPE.sync_scope(RefCell::new(ScopeState::new()), f)
}

/// Copy of a unit's state, used to seed work handed to another thread.
#[derive(Debug, Clone)]
pub struct ScopeSnapshot {
    state: ScopeState,
}

impl ScopeSnapshot {
    /// Copy the current unit's state.
    pub fn capture() -> Self {
        Self {
            state: try_read(ScopeState::clone).unwrap_or_else(ScopeState::new),
        }
    }

    /// Run `f` as a unit of work seeded with this snapshot.
    pub fn enter<R>(self, f: impl FnOnce() -> R) -> R {
        TASK_SCOPE.sync_scope(RefCell::new(self.state), f)
    }

    /// Run `fut` as a unit of work seeded with this snapshot.
    pub fn scope<F: Future>(self, fut: F) -> impl Future<Output = F::Output> {
        TASK_SCOPE.scope(RefCell::new(self.state), fut)
    }
}
