//! Buffered Script / silencing.
//!
//! Wraps a [`capture`] so its stdout and/or stderr are diverted into an
//! [`entangled pair`](crate::entangled) instead of flowing straight out.
//! Nothing reaches a consumer until [`BufferedScript::release`] is called,
//! at which point everything buffered so far replays in its original
//! interleaved order and subsequent output flows through live. A
//! `BufferedScript` whose `release` is never called behaves as silencing;
//! [`silence_until_failure`] is exactly that, with `release` wired to fire
//! automatically the moment the inner capture fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::capture::{capture, CaptureError, CaptureStdin, OnSignal};
use crate::entangled::{entangled_pair, EntangledController, Event};
use crate::script::{ByteStream, Script, ScriptBackend, ScriptComponents, Signal};

type Delivery = mpsc::UnboundedReceiver<Event<Vec<u8>>>;

enum DeferredState {
    Waiting(oneshot::Receiver<Delivery>),
    Ready(Delivery),
}

async fn next_chunk(mut state: DeferredState) -> Option<(Vec<u8>, DeferredState)> {
    loop {
        state = match state {
            DeferredState::Waiting(rx) => match rx.await {
                Ok(delivery) => DeferredState::Ready(delivery),
                Err(_) => return None,
            },
            DeferredState::Ready(mut delivery) => {
                return match delivery.recv().await {
                    Some(Event::Data(chunk)) => Some((chunk, DeferredState::Ready(delivery))),
                    Some(Event::Error(_)) | Some(Event::Close) | None => None,
                };
            }
        };
    }
}

/// A byte stream that stays pending until `rx` delivers the entangled
/// channel's real receiver, then forwards its chunks until `Close`.
fn deferred_stream(rx: oneshot::Receiver<Delivery>) -> ByteStream {
    Box::pin(futures::stream::unfold(DeferredState::Waiting(rx), next_chunk))
}

fn forward_into(mut source: ByteStream, ctrl: EntangledController<Vec<u8>>) {
    tokio::spawn(async move {
        while let Some(chunk) = source.next().await {
            ctrl.submit(Event::Data(chunk));
        }
        ctrl.submit(Event::Close);
    });
}

struct DelegateBackend(Script);

#[async_trait]
impl ScriptBackend for DelegateBackend {
    async fn kill(&self, signal: Signal) -> bool {
        self.0.kill(signal).await
    }
}

/// A capture whose stdout/stderr stay withheld until [`release`](Self::release).
pub struct BufferedScript {
    script: Script,
    stdout_release: Option<(EntangledController<Vec<u8>>, oneshot::Sender<Delivery>)>,
    stderr_release: (EntangledController<Vec<u8>>, oneshot::Sender<Delivery>),
    released: Arc<AtomicBool>,
}

impl BufferedScript {
    /// The composite Script: its stdin/exit_code/kill forward to the
    /// wrapped capture; stdout/stderr stay silent until `release`.
    pub fn script(&self) -> &Script {
        &self.script
    }

    /// Flushes whatever stdout/stderr has accumulated so far in its
    /// original interleaved order, then lets everything from here on flow
    /// through live. Idempotent. Waits for the wrapped capture's exit plus
    /// one scheduling step before returning.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some((ctrl, sender)) = &self.stdout_release {
            if let Some(delivery) = ctrl.subscribe() {
                let _ = sender.send(delivery);
            }
        }
        let (ctrl, sender) = &self.stderr_release;
        if let Some(delivery) = ctrl.subscribe() {
            let _ = sender.send(delivery);
        }
        self.script.exit_code().await;
        tokio::task::yield_now().await;
    }
}

fn build<F>(
    name: impl Into<Arc<str>>,
    cb: F,
    on_signal: Option<OnSignal>,
    buffer_stdout: bool,
) -> Arc<BufferedScript>
where
    F: FnOnce(CaptureStdin) -> futures::future::BoxFuture<'static, Result<(), CaptureError>>
        + Send
        + 'static,
{
    let name: Arc<str> = name.into();
    let inner = capture(name.clone(), cb, on_signal);

    let raw_stdout = inner
        .stdout()
        .expect("buffered: capture's stdout not yet consumed");
    let raw_stderr = inner
        .stderr()
        .expect("buffered: capture's stderr not yet consumed");

    let (ctrl_out, ctrl_err) = entangled_pair::<Vec<u8>>();

    let (stdout_stream, stdout_release) = if buffer_stdout {
        let sub = ctrl_out.clone();
        forward_into(raw_stdout, ctrl_out);
        let (tx, rx) = oneshot::channel();
        (deferred_stream(rx), Some((sub, tx)))
    } else {
        (raw_stdout, None)
    };

    let sub_err = ctrl_err.clone();
    forward_into(raw_stderr, ctrl_err);
    let (err_tx, err_rx) = oneshot::channel();
    let stderr_stream = deferred_stream(err_rx);

    let exit_inner = inner.clone();
    let exit_code: crate::script::ExitFuture = Box::pin(async move { exit_inner.exit_code().await });
    let kill = Arc::new(DelegateBackend(inner.clone()));
    let stdin = inner.stdin().clone();

    let script = Script::from_components(
        name,
        ScriptComponents {
            stdin,
            stdout: stdout_stream,
            stderr: stderr_stream,
            exit_code,
            kill,
        },
    );

    Arc::new(BufferedScript {
        script,
        stdout_release,
        stderr_release: (sub_err, err_tx),
        released: Arc::new(AtomicBool::new(false)),
    })
}

/// Buffers both stdout and stderr together, preserving their interleaved
/// order, until the caller explicitly [`release`](BufferedScript::release)s.
pub fn buffered<F>(name: impl Into<Arc<str>>, cb: F, on_signal: Option<OnSignal>) -> Arc<BufferedScript>
where
    F: FnOnce(CaptureStdin) -> futures::future::BoxFuture<'static, Result<(), CaptureError>>
        + Send
        + 'static,
{
    build(name, cb, on_signal, true)
}

/// Like [`buffered`], but stdout passes through live and unbuffered; only
/// stderr is withheld until `release`.
pub fn stderr_only<F>(
    name: impl Into<Arc<str>>,
    cb: F,
    on_signal: Option<OnSignal>,
) -> Arc<BufferedScript>
where
    F: FnOnce(CaptureStdin) -> futures::future::BoxFuture<'static, Result<(), CaptureError>>
        + Send
        + 'static,
{
    build(name, cb, on_signal, false)
}

/// Silences a capture's stdout and stderr entirely unless it fails: on
/// success the buffered output is simply discarded with the `BufferedScript`
/// handle; on failure `release` fires automatically, flushing everything
/// before the composite Script's own `done` resolves to the error.
pub fn silence_until_failure<F>(
    name: impl Into<Arc<str>>,
    cb: F,
    on_signal: Option<OnSignal>,
) -> Script
where
    F: FnOnce(CaptureStdin) -> futures::future::BoxFuture<'static, Result<(), CaptureError>>
        + Send
        + 'static,
{
    let buffered = buffered(name, cb, on_signal);
    let script = buffered.script().clone();
    let watcher = buffered.clone();
    tokio::spawn(async move {
        if watcher.script().done().await.is_err() {
            watcher.release().await;
        }
    });
    script
}

#[cfg(test)]
#[path = "buffered_tests.rs"]
mod tests;
