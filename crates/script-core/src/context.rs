//! Ambient script context.
//!
//! A dynamically-scoped record carrying the current capture's stdout/stderr
//! groups, child-completion tracker, name, environment overlay and trace
//! flags. Realized as a `tokio::task_local!` so nested `capture` frames form
//! a stack without a global — `AMBIENT.scope(...)` restores the parent
//! context automatically when a nested frame's future completes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::ScriptError;
use crate::stdio_group::StdioGroup;

tokio::task_local! {
    static AMBIENT: AmbientContext;
}

/// One record per `capture` frame.
#[derive(Clone)]
pub struct AmbientContext {
    pub name: Arc<str>,
    pub stdout: StdioGroup,
    pub stderr: StdioGroup,
    pub children: ChildTracker,
    pub env_overlay: Arc<HashMap<String, Option<String>>>,
    pub verbose: bool,
    pub debug: bool,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl AmbientContext {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            stdout: StdioGroup::new(),
            stderr: StdioGroup::new(),
            children: ChildTracker::new(),
            env_overlay: Arc::new(HashMap::new()),
            verbose: false,
            debug: false,
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn with_env_overlay(mut self, overlay: HashMap<String, Option<String>>) -> Self {
        self.env_overlay = Arc::new(overlay);
        self
    }

    pub fn with_flags(mut self, verbose: bool, debug: bool) -> Self {
        self.verbose = verbose;
        self.debug = debug;
        self
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// The ambient context of the innermost enclosing `capture`, if any.
pub fn current() -> Option<AmbientContext> {
    AMBIENT.try_with(|ctx| ctx.clone()).ok()
}

/// Runs `fut` with `ctx` installed as the ambient context, nesting over
/// whatever context (if any) was already active.
pub async fn with_context<F>(ctx: AmbientContext, fut: F) -> F::Output
where
    F: std::future::Future,
{
    AMBIENT.scope(ctx, fut).await
}

/// A futures-group tracking child Scripts registered inside a capture frame.
#[derive(Clone)]
pub struct ChildTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    pending: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
    notify: Notify,
    first_error: Mutex<Option<ScriptError>>,
}

impl Default for ChildTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChildTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                pending: Mutex::new(HashSet::new()),
                next_id: AtomicU64::new(0),
                notify: Notify::new(),
                first_error: Mutex::new(None),
            }),
        }
    }

    /// Registers a child; `completion` resolves when the child's `done`
    /// fires. Errors are recorded (first one wins) rather than propagated
    /// synchronously — callers poll `first_error` instead.
    pub fn register<F>(&self, completion: F)
    where
        F: std::future::Future<Output = Result<(), ScriptError>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::AcqRel);
        self.inner.pending.lock().unwrap().insert(id);
        self.inner.notify.notify_waiters();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(err) = completion.await {
                let mut slot = inner.first_error.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(err);
                }
            }
            inner.pending.lock().unwrap().remove(&id);
            inner.notify.notify_waiters();
        });
    }

    pub fn is_idle(&self) -> bool {
        self.inner.pending.lock().unwrap().is_empty()
    }

    pub fn first_error(&self) -> Option<ScriptError> {
        self.inner.first_error.lock().unwrap().clone()
    }

    /// Waits until the tracker has no pending children *and* one scheduling
    /// step has elapsed without a new child appearing, so a child spawned in
    /// the same tick as the last one finishing isn't missed.
    pub async fn wait_until_idle(&self) {
        loop {
            if !self.is_idle() {
                self.inner.notify.notified().await;
                continue;
            }
            tokio::task::yield_now().await;
            if self.is_idle() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_context_outside_a_capture_frame() {
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn context_is_visible_inside_its_scope_and_not_after() {
        let ctx = AmbientContext::new("root");
        with_context(ctx, async {
            assert!(current().is_some());
            assert_eq!(current().unwrap().name.as_ref(), "root");
        })
        .await;
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn nested_scopes_restore_the_outer_context() {
        let outer = AmbientContext::new("outer");
        with_context(outer, async {
            let inner = AmbientContext::new("inner");
            with_context(inner, async {
                assert_eq!(current().unwrap().name.as_ref(), "inner");
            })
            .await;
            assert_eq!(current().unwrap().name.as_ref(), "outer");
        })
        .await;
    }

    #[tokio::test]
    async fn tracker_is_idle_with_no_children() {
        let tracker = ChildTracker::new();
        assert!(tracker.is_idle());
        tracker.wait_until_idle().await;
    }

    #[tokio::test]
    async fn tracker_becomes_idle_after_child_completes() {
        let tracker = ChildTracker::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tracker.register(async move {
            let _ = rx.await;
            Ok(())
        });
        assert!(!tracker.is_idle());
        tx.send(()).unwrap();
        tracker.wait_until_idle().await;
        assert!(tracker.is_idle());
    }

    #[tokio::test]
    async fn tracker_records_first_child_error() {
        let tracker = ChildTracker::new();
        tracker.register(async {
            Err(ScriptError::ScriptFailed {
                name: "c".into(),
                exit_code: 2,
            })
        });
        tracker.wait_until_idle().await;
        assert!(tracker.first_error().is_some());
    }
}
