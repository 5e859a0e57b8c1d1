//! Stdio group.
//!
//! Merges a dynamically growing set of child byte streams plus a
//! synchronous sink into one output stream, preserving submission order
//! across both sources. Used by a capture frame to give nested Scripts an
//! ambient stdout/stderr to connect to.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::Stream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{ScriptError, StreamKind};

struct Inner {
    /// The group's own reference to the merge channel. `writeln` always
    /// writes through this, regardless of what `sink()` handles are doing;
    /// `close()` drops it, letting the channel end once in-flight `add()`
    /// forwarders finish draining.
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    pending_children: Arc<AtomicUsize>,
    closed: AtomicBool,
}

/// A merging multiplexer of byte streams plus a writable sink.
#[derive(Clone)]
pub struct StdioGroup {
    inner: Arc<Inner>,
}

impl fmt::Debug for StdioGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioGroup")
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StdioGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioGroup {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
                pending_children: Arc::new(AtomicUsize::new(0)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// An unbounded write handle. Its own `close()` never seals the group.
    pub fn sink(&self) -> StdioSink {
        StdioSink {
            inner: self.inner.clone(),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Attach a new child stream. Fails with [`ScriptError::InvalidInput`]
    /// once the group has closed.
    pub fn add<S>(&self, stream: S) -> Result<(), ScriptError>
    where
        S: Stream<Item = Vec<u8>> + Send + 'static,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ScriptError::InvalidInput(
                "stdio group is closed".to_string(),
            ));
        }
        let Some(tx) = self.inner.tx.lock().unwrap().clone() else {
            return Err(ScriptError::InvalidInput(
                "stdio group is closed".to_string(),
            ));
        };
        self.inner.pending_children.fetch_add(1, Ordering::AcqRel);
        let pending = self.inner.pending_children.clone();
        tokio::spawn(async move {
            tokio::pin!(stream);
            while let Some(chunk) = stream.next().await {
                if tx.send(chunk).is_err() {
                    break;
                }
            }
            pending.fetch_sub(1, Ordering::AcqRel);
        });
        Ok(())
    }

    /// Writes `text` plus a trailing newline directly to the shared buffer.
    /// Succeeds even when the user-visible [`StdioSink`] has been closed, or
    /// while an `add()` forwarder is mid-flight.
    pub fn writeln(&self, text: impl fmt::Display) {
        if let Some(tx) = self.inner.tx.lock().unwrap().as_ref() {
            let _ = tx.send(format!("{text}\n").into_bytes());
        }
    }

    /// Closes the control sink's queue, then seals the multiplexer: once
    /// every in-flight `add()` forwarder has drained, the merged `stream()`
    /// emits its terminal close event.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.tx.lock().unwrap().take();
    }

    /// The single merged output. Admits at most one consumer.
    pub fn stream(&self) -> Result<impl Stream<Item = Vec<u8>> + Send + 'static, ScriptError> {
        let rx = self.inner.rx.lock().unwrap().take().ok_or_else(|| {
            ScriptError::AlreadyConsumed {
                name: "stdio-group".to_string(),
                stream: StreamKind::Stdout,
            }
        })?;
        Ok(UnboundedReceiverStream::new(rx))
    }
}

/// An unbounded write handle returned by [`StdioGroup::sink`].
#[derive(Clone)]
pub struct StdioSink {
    inner: Arc<Inner>,
    open: Arc<AtomicBool>,
}

impl StdioSink {
    /// Writes a chunk, unless this handle has been `close()`d.
    pub fn write(&self, chunk: Vec<u8>) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        if let Some(tx) = self.inner.tx.lock().unwrap().as_ref() {
            let _ = tx.send(chunk);
        }
    }

    /// Closes this handle only; never seals the owning [`StdioGroup`].
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn sink_writes_are_delivered_in_order() {
        let group = StdioGroup::new();
        let sink = group.sink();
        sink.write(b"a".to_vec());
        sink.write(b"b".to_vec());
        let mut out = group.stream().unwrap();
        assert_eq!(out.next().await, Some(b"a".to_vec()));
        assert_eq!(out.next().await, Some(b"b".to_vec()));
    }

    #[tokio::test]
    async fn writeln_succeeds_after_sink_closed() {
        let group = StdioGroup::new();
        let sink = group.sink();
        sink.close();
        group.writeln("hello");
        let mut out = group.stream().unwrap();
        assert_eq!(out.next().await, Some(b"hello\n".to_vec()));
    }

    #[tokio::test]
    async fn add_fails_once_closed() {
        let group = StdioGroup::new();
        group.close();
        let err = group.add(stream::iter(vec![b"x".to_vec()]));
        assert!(matches!(err, Err(ScriptError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn second_stream_subscription_fails() {
        let group = StdioGroup::new();
        assert!(group.stream().is_ok());
        assert!(group.stream().is_err());
    }

    #[tokio::test]
    async fn added_child_streams_interleave_with_sink() {
        let group = StdioGroup::new();
        group.add(stream::iter(vec![b"child".to_vec()])).unwrap();
        group.writeln("sink-line");
        let mut out = group.stream().unwrap();
        let mut seen = Vec::new();
        for _ in 0..2 {
            if let Some(chunk) = out.next().await {
                seen.push(chunk);
            }
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&b"child".to_vec()));
        assert!(seen.contains(&b"sink-line\n".to_vec()));
    }

    #[tokio::test]
    async fn close_seals_output_after_children_drain() {
        let group = StdioGroup::new();
        group.add(stream::iter(vec![b"only".to_vec()])).unwrap();
        group.close();
        let mut out = group.stream().unwrap();
        assert_eq!(out.next().await, Some(b"only".to_vec()));
        assert_eq!(out.next().await, None);
    }
}
