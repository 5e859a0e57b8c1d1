//! Delayed one-shot.
//!
//! A completion value that is captured early (`complete`) but only
//! dispatched to observers once explicitly released (`release`). Used to
//! make a Script's `done` fire only after its ambient stdio has had a
//! scheduling quantum to propagate.

use std::sync::Mutex;

#[cfg(test)]
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug)]
enum State<T> {
    Pending,
    Completed(T),
    /// `release()` was called before a value arrived; the next `complete`
    /// fires immediately instead of waiting for a later `release`.
    Released,
    /// Terminal: a value has been handed to observers via the watch
    /// channel. Kept distinct from `Released` so `release()`/`complete()`
    /// calls after firing are true no-ops rather than silently resetting
    /// state.
    Fired,
}

/// A one-shot with an explicit `release()` gate.
pub struct DelayedOneShot<T> {
    state: Mutex<State<T>>,
    // Carries `Some(value)` only once fired; `ready()` subscribes a fresh
    // receiver each call so repeated calls are idempotent without needing
    // `&mut self`.
    watch_tx: watch::Sender<Option<T>>,
}

impl<T: Clone + Send + Sync + 'static> Default for DelayedOneShot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> DelayedOneShot<T> {
    pub fn new() -> Self {
        let (watch_tx, _watch_rx) = watch::channel(None);
        Self {
            state: Mutex::new(State::Pending),
            watch_tx,
        }
    }

    /// `Pending -> Completed(value)`, or fires immediately if `release()`
    /// already ran while pending. A `complete` after the first one is
    /// ignored — a `DelayedOneShot` carries exactly one value.
    pub fn complete(&self, value: T) {
        let mut guard = self.state.lock().unwrap();
        match &*guard {
            State::Pending => *guard = State::Completed(value),
            State::Released => {
                *guard = State::Fired;
                drop(guard);
                self.watch_tx.send_replace(Some(value));
            }
            State::Completed(_) | State::Fired => {}
        }
    }

    /// Release the gate: if a value is already `Completed`, fire now;
    /// otherwise arm `Released` so the next `complete` fires immediately.
    /// Idempotent.
    pub fn release(&self) {
        let mut guard = self.state.lock().unwrap();
        let fire_value = match &*guard {
            State::Pending => {
                *guard = State::Released;
                None
            }
            State::Completed(_) => match std::mem::replace(&mut *guard, State::Fired) {
                State::Completed(v) => Some(v),
                _ => unreachable!(),
            },
            State::Released | State::Fired => None,
        };
        drop(guard);
        if let Some(v) = fire_value {
            self.watch_tx.send_replace(Some(v));
        }
    }

    /// Await the released value. Idempotent: any number of callers, called
    /// any number of times, observe the same value once fired.
    pub async fn ready(&self) -> T {
        let mut rx = self.watch_tx.subscribe();
        loop {
            if let Some(v) = rx.borrow().clone() {
                return v;
            }
            if rx.changed().await.is_err() {
                // `self` always keeps one sender alive, so this can't
                // happen in practice; retry defensively rather than hang.
                continue;
            }
        }
    }

    /// True once a value has been fired to observers.
    pub fn is_released(&self) -> bool {
        matches!(*self.state.lock().unwrap(), State::Fired)
    }
}

impl<V: Clone + Send + Sync + 'static, E: Clone + Send + Sync + 'static>
    DelayedOneShot<Result<V, E>>
{
    pub fn complete_ok(&self, value: V) {
        self.complete(Ok(value));
    }

    pub fn complete_err(&self, err: E) {
        self.complete(Err(err));
    }
}
