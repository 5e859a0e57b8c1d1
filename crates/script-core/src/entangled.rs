//! Entangled dual-channel buffer.
//!
//! Two sibling controllers share one insertion-ordered queue of
//! `(channel, event)` pairs. Before either side is subscribed, submissions
//! just accumulate. The first `subscribe()` call (on either controller)
//! starts a drain that redelivers the queue one event per scheduling tick,
//! routed to the labeled controller's channel — this is what lets a
//! consumer that attaches late still observe every earlier event in its
//! original cross-channel order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Which sibling channel an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    A,
    B,
}

/// An event flowing through one channel of an entangled pair.
#[derive(Debug, Clone)]
pub enum Event<T> {
    Data(T),
    Error(crate::error::ScriptError),
    Close,
}

struct QueueState<T> {
    buffer: VecDeque<(Channel, Event<T>)>,
    /// Once true, submissions bypass the queue entirely; flipped only while
    /// holding the same lock the drain loop drains under, so there is no
    /// window where a submission can be dropped between "queue looked
    /// empty" and "direct mode armed".
    direct: bool,
}

struct Inner<T> {
    state: Mutex<QueueState<T>>,
    tx_a: mpsc::UnboundedSender<Event<T>>,
    tx_b: mpsc::UnboundedSender<Event<T>>,
    rx_a: Mutex<Option<mpsc::UnboundedReceiver<Event<T>>>>,
    rx_b: Mutex<Option<mpsc::UnboundedReceiver<Event<T>>>>,
    drain_started: AtomicBool,
}

/// One side of an [`entangled_pair`]: submits events labeled with this
/// channel, and may be subscribed exactly once.
pub struct EntangledController<T> {
    inner: Arc<Inner<T>>,
    channel: Channel,
}

impl<T> Clone for EntangledController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            channel: self.channel,
        }
    }
}

/// Build a fresh entangled pair. `T` is the payload type carried by
/// [`Event::Data`] — typically a byte chunk (`Vec<u8>` / `bytes::Bytes`-like).
pub fn entangled_pair<T: Send + 'static>() -> (EntangledController<T>, EntangledController<T>) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();
    let inner = Arc::new(Inner {
        state: Mutex::new(QueueState {
            buffer: VecDeque::new(),
            direct: false,
        }),
        tx_a,
        tx_b,
        rx_a: Mutex::new(Some(rx_a)),
        rx_b: Mutex::new(Some(rx_b)),
        drain_started: AtomicBool::new(false),
    });
    (
        EntangledController {
            inner: inner.clone(),
            channel: Channel::A,
        },
        EntangledController {
            inner,
            channel: Channel::B,
        },
    )
}

impl<T: Send + 'static> EntangledController<T> {
    /// Submit an event on this controller's channel.
    pub fn submit(&self, event: Event<T>) {
        let mut state = self.inner.state.lock().unwrap();
        if state.direct {
            drop(state);
            self.send_direct(event);
        } else {
            state.buffer.push_back((self.channel, event));
        }
    }

    fn send_direct(&self, event: Event<T>) {
        let tx = match self.channel {
            Channel::A => &self.inner.tx_a,
            Channel::B => &self.inner.tx_b,
        };
        let _ = tx.send(event);
    }

    /// Take this channel's receiver, arming the drain on first subscription
    /// from either side. Returns `None` if already subscribed.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<Event<T>>> {
        let rx_slot = match self.channel {
            Channel::A => &self.inner.rx_a,
            Channel::B => &self.inner.rx_b,
        };
        let receiver = rx_slot.lock().unwrap().take()?;
        if self
            .inner
            .drain_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tokio::spawn(drain(self.inner.clone()));
        }
        Some(receiver)
    }
}

async fn drain<T: Send + 'static>(inner: Arc<Inner<T>>) {
    loop {
        let next = {
            let mut state = inner.state.lock().unwrap();
            match state.buffer.pop_front() {
                Some(entry) => Some(entry),
                None => {
                    state.direct = true;
                    None
                }
            }
        };
        let Some((channel, event)) = next else {
            break;
        };
        let tx = match channel {
            Channel::A => &inner.tx_a,
            Channel::B => &inner.tx_b,
        };
        let _ = tx.send(event);
        tokio::task::yield_now().await;
    }
}
