//! The Script object: the uniform four-port unit, its lifecycle, error
//! handling, and signal plumbing.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::delayed::DelayedOneShot;
use crate::error::{ScriptError, StreamKind};
use crate::{context, exit};

/// A chunk of bytes flowing through a Script's stdin, stdout, or stderr.
pub type ByteChunk = Vec<u8>;

/// A boxed, `Send` byte stream — the concrete shape of a Script's stdout
/// or stderr port.
pub type ByteStream = Pin<Box<dyn Stream<Item = ByteChunk> + Send>>;

/// A boxed future resolving to a Script's numeric exit code.
pub type ExitFuture = BoxFuture<'static, i32>;

/// The signal `Script::kill` may deliver. `Signal::Term` is the default,
/// matching a plain `kill(signal = SIGTERM)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Signal {
    #[default]
    Term,
    Kill,
    Int,
    Hup,
    Quit,
}

/// The per-construction-variant visitor a Script delegates `kill` to: a
/// signal over a graph of Scripts is modeled as a visitor that each
/// construction kind implements its own way.
#[async_trait]
pub trait ScriptBackend: Send + Sync {
    /// Attempt delivery. Returns whether the backend accepted the signal —
    /// not whether the Script has since exited.
    async fn kill(&self, signal: Signal) -> bool;
}

/// A backend that never accepts a signal; used by transformer and capture
/// variants with no configured `on_signal` handler.
pub struct NoSignalBackend;

#[async_trait]
impl ScriptBackend for NoSignalBackend {
    async fn kill(&self, _signal: Signal) -> bool {
        false
    }
}

/// The four raw ports a late-binding factory resolves to, plus the signal
/// visitor for this construction.
pub struct ScriptComponents {
    pub stdin: StdinSink,
    pub stdout: ByteStream,
    pub stderr: ByteStream,
    pub exit_code: ExitFuture,
    pub kill: Arc<dyn ScriptBackend>,
}

/// One event submitted to a Script's stdin. Writing an error event closes
/// the sink and surfaces the error through the sink's own completion.
/// Exposed so a factory implementation (e.g. `script-exec`'s subprocess
/// backend) can drive its own stdin pipe from the buffered events a
/// [`StdinSink`] collects before the real backend exists.
#[derive(Debug)]
pub enum StdinEvent {
    Data(ByteChunk),
    Err(ScriptError),
}

struct StdinInner {
    tx: Mutex<Option<mpsc::UnboundedSender<StdinEvent>>>,
    completion: DelayedOneShot<Result<(), ScriptError>>,
}

/// A write-only sink of byte chunks.
#[derive(Clone)]
pub struct StdinSink {
    inner: Arc<StdinInner>,
}

impl fmt::Debug for StdinSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdinSink")
            .field("closed", &self.inner.tx.lock().unwrap().is_none())
            .finish()
    }
}

impl StdinSink {
    /// Builds a fresh sink paired with the receiver end of its event queue.
    /// Most callers won't need this directly — it exists for factory
    /// implementations (subprocess spawners, transformer adapters) that
    /// must drive their own stdin pipe from what the caller writes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StdinEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(StdinInner {
                    tx: Mutex::new(Some(tx)),
                    completion: DelayedOneShot::new(),
                }),
            },
            rx,
        )
    }

    /// Writes a chunk. No-op once stdin has closed.
    pub fn write(&self, chunk: ByteChunk) {
        if let Some(tx) = self.inner.tx.lock().unwrap().as_ref() {
            let _ = tx.send(StdinEvent::Data(chunk));
        }
    }

    /// Writes an error event: closes the sink and surfaces `err` through
    /// [`StdinSink::completion`].
    pub fn write_error(&self, err: ScriptError) {
        if self.inner.tx.lock().unwrap().take().is_some() {
            self.inner.completion.complete(Err(err));
            self.inner.completion.release();
        }
    }

    /// Closes the sink cleanly (no error).
    pub fn close(&self) {
        if self.inner.tx.lock().unwrap().take().is_some() {
            self.inner.completion.complete(Ok(()));
            self.inner.completion.release();
        }
    }

    /// Resolves once the sink has closed, carrying an error iff it closed
    /// via [`StdinSink::write_error`].
    pub async fn completion(&self) -> Result<(), ScriptError> {
        self.inner.completion.ready().await
    }
}

struct PortInner {
    stream: Mutex<Option<ByteStream>>,
    consumed: Arc<AtomicBool>,
    kind: StreamKind,
    script_name: Arc<str>,
}

/// Wraps a Script's stdout or stderr stream with an at-most-one-subscriber
/// invariant.
#[derive(Clone)]
struct ScriptPort {
    inner: Arc<PortInner>,
}

impl ScriptPort {
    fn new(stream: ByteStream, kind: StreamKind, script_name: Arc<str>) -> Self {
        Self {
            inner: Arc::new(PortInner {
                stream: Mutex::new(Some(stream)),
                consumed: Arc::new(AtomicBool::new(false)),
                kind,
                script_name,
            }),
        }
    }

    /// Builds a port whose stream only becomes available once `rx`
    /// resolves — stdout/stderr for a spawned factory are stream
    /// completers awaiting their source.
    fn deferred(rx: oneshot::Receiver<ByteStream>, kind: StreamKind, script_name: Arc<str>) -> Self {
        let stream: ByteStream = Box::pin(
            futures::stream::once(async move {
                rx.await.unwrap_or_else(|_| Box::pin(futures::stream::empty()) as ByteStream)
            })
            .flatten(),
        );
        Self::new(stream, kind, script_name)
    }

    fn take(&self) -> Result<ByteStream, ScriptError> {
        if self.inner.consumed.swap(true, Ordering::AcqRel) {
            return Err(self.already_consumed());
        }
        self.inner
            .stream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| self.already_consumed())
    }

    fn already_consumed(&self) -> ScriptError {
        ScriptError::AlreadyConsumed {
            name: self.inner.script_name.to_string(),
            stream: self.inner.kind,
        }
    }

    fn consumed_flag(&self) -> Arc<AtomicBool> {
        self.inner.consumed.clone()
    }

    /// If nobody has consumed this port yet, hand its stream to the given
    /// ambient group (or process stdio if there is none) — the
    /// grace-window fallback.
    fn attach_if_unconsumed(&self, ambient: Option<&context::AmbientContext>) {
        if self.inner.consumed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(stream) = self.inner.stream.lock().unwrap().take() else {
            return;
        };
        match (ambient, self.inner.kind) {
            (Some(ctx), StreamKind::Stdout) => {
                let _ = ctx.stdout.add(stream);
            }
            (Some(ctx), StreamKind::Stderr) => {
                let _ = ctx.stderr.add(stream);
            }
            (None, StreamKind::Stdout) => spawn_passthrough(stream, Pass::Stdout),
            (None, StreamKind::Stderr) => spawn_passthrough(stream, Pass::Stderr),
        }
    }
}

enum Pass {
    Stdout,
    Stderr,
}

fn spawn_passthrough(mut stream: ByteStream, target: Pass) {
    tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        while let Some(chunk) = stream.next().await {
            let _ = match target {
                Pass::Stdout => tokio::io::stdout().write_all(&chunk).await,
                Pass::Stderr => tokio::io::stderr().write_all(&chunk).await,
            };
        }
    });
}

/// How long a freshly constructed Script waits for its stdout/stderr to be
/// explicitly consumed before handing them to ambient stdio. Kept at zero
/// wall-clock time — the wait is expressed in scheduling steps, not real
/// time, so tests can use `start_paused` runtimes for determinism.
pub const GRACE_WINDOW: Duration = Duration::from_millis(0);

async fn wait_grace_or_consumed(stdout: Arc<AtomicBool>, stderr: Arc<AtomicBool>) {
    tokio::select! {
        _ = tokio::time::sleep(GRACE_WINDOW) => {}
        _ = async {
            loop {
                if stdout.load(Ordering::Acquire) && stderr.load(Ordering::Acquire) {
                    return;
                }
                tokio::task::yield_now().await;
            }
        } => {}
    }
}

/// The uniform four-port unit. Cheap to `Clone`: every field is itself
/// `Arc`-backed, so clones are handles onto the same underlying ports, not
/// independent copies.
#[derive(Clone)]
pub struct Script {
    name: Arc<str>,
    stdin: StdinSink,
    stdout: ScriptPort,
    stderr: ScriptPort,
    exit_code: Arc<DelayedOneShot<i32>>,
    done: Arc<DelayedOneShot<Result<(), ScriptError>>>,
    backend: Arc<Mutex<Option<Arc<dyn ScriptBackend>>>>,
    pending_signal: Arc<Mutex<Option<Signal>>>,
    exited: Arc<AtomicBool>,
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script").field("name", &self.name).finish()
    }
}

impl Script {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stdin(&self) -> &StdinSink {
        &self.stdin
    }

    /// Takes the stdout stream. Fails with [`ScriptError::AlreadyConsumed`]
    /// on a second call, or after the grace window has handed it to
    /// ambient stdio.
    pub fn stdout(&self) -> Result<ByteStream, ScriptError> {
        self.stdout.take()
    }

    pub fn stderr(&self) -> Result<ByteStream, ScriptError> {
        self.stderr.take()
    }

    pub async fn exit_code(&self) -> i32 {
        self.exit_code.ready().await
    }

    /// Resolves `Ok(())` iff `exit_code == 0`, else
    /// `Err(ScriptFailed(name, exit_code))`.
    pub async fn done(&self) -> Result<(), ScriptError> {
        self.done.ready().await
    }

    pub async fn success(&self) -> bool {
        self.exit_code().await == 0
    }

    /// Buffers the whole stdout stream as bytes and waits for `done`.
    pub async fn output_bytes(&self) -> Result<Vec<u8>, ScriptError> {
        let mut stream = self.stdout()?;
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk);
        }
        self.done().await?;
        Ok(buf)
    }

    /// Convenience accessor: lossy UTF-8 decode of [`Script::output_bytes`].
    pub async fn output(&self) -> Result<String, ScriptError> {
        let bytes = self.output_bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Attempts delivery of `signal`. Returns `false` if the Script has
    /// already exited, or its backend declined.
    pub async fn kill(&self, signal: Signal) -> bool {
        if self.exited.load(Ordering::Acquire) {
            return false;
        }
        let backend = self.backend.lock().unwrap().clone();
        match backend {
            Some(backend) => {
                debug!(name = %self.name, ?signal, "delivering signal");
                backend.kill(signal).await
            }
            None => {
                // Factory hasn't resolved yet: capture the signal and
                // replay it once the real backend is wired.
                *self.pending_signal.lock().unwrap() = Some(signal);
                true
            }
        }
    }

    /// The raw-components constructor: the primitive all other factories
    /// share.
    pub fn from_components(name: impl Into<Arc<str>>, components: ScriptComponents) -> Script {
        Self::from_components_with_error_override(name, components, Arc::new(Mutex::new(None)))
    }

    /// Like [`Script::from_components`], but lets the caller override the
    /// error `done` resolves with on a nonzero exit code (used by `capture`
    /// to surface `ScriptFailed(child.name, child.exit_code)` instead of its
    /// own name). `error_override` is consulted exactly once, at the moment
    /// the exit code resolves.
    pub(crate) fn from_components_with_error_override(
        name: impl Into<Arc<str>>,
        components: ScriptComponents,
        error_override: Arc<Mutex<Option<ScriptError>>>,
    ) -> Script {
        let name: Arc<str> = name.into();
        if let Some(dead) = capture_closed_script(name.clone()) {
            return dead;
        }
        let stdout_port = ScriptPort::new(components.stdout, StreamKind::Stdout, name.clone());
        let stderr_port = ScriptPort::new(components.stderr, StreamKind::Stderr, name.clone());
        // `exit_code` has no grace-window gating of its own (only `done`
        // does — see `wire_lifecycle`), so it is released immediately:
        // the next `complete()` fires straight through to observers.
        let exit_one_shot = Arc::new(DelayedOneShot::new());
        exit_one_shot.release();
        let exited = Arc::new(AtomicBool::new(false));

        {
            let exit_one_shot = exit_one_shot.clone();
            let exited = exited.clone();
            let exit_fut = components.exit_code;
            tokio::spawn(async move {
                let code = exit_fut.await;
                exited.store(true, Ordering::Release);
                exit_one_shot.complete(code);
            });
        }

        let done = wire_lifecycle(&name, &stdout_port, &stderr_port, &exit_one_shot, error_override);
        register_with_ambient(&done);

        Script {
            name,
            stdin: components.stdin,
            stdout: stdout_port,
            stderr: stderr_port,
            exit_code: exit_one_shot,
            done,
            backend: Arc::new(Mutex::new(Some(components.kill))),
            pending_signal: Arc::new(Mutex::new(None)),
            exited,
        }
    }

    /// `factory` is invoked asynchronously; a throw, or an error surfacing
    /// from the resulting process at any stage, becomes this Script's exit.
    pub fn from_spawn_factory<F>(name: impl Into<Arc<str>>, factory: F) -> Script
    where
        F: FnOnce() -> BoxFuture<'static, Result<ScriptComponents, ScriptError>> + Send + 'static,
    {
        let name: Arc<str> = name.into();
        if let Some(dead) = capture_closed_script(name.clone()) {
            return dead;
        }
        let (early_stdin, mut early_rx) = StdinSink::new();
        let (stdout_tx, stdout_rx) = oneshot::channel::<ByteStream>();
        let (stderr_tx, stderr_rx) = oneshot::channel::<ByteStream>();
        let exit_one_shot: Arc<DelayedOneShot<i32>> = Arc::new(DelayedOneShot::new());
        exit_one_shot.release();
        let exited = Arc::new(AtomicBool::new(false));

        let stdout_port = ScriptPort::deferred(stdout_rx, StreamKind::Stdout, name.clone());
        let stderr_port = ScriptPort::deferred(stderr_rx, StreamKind::Stderr, name.clone());

        let backend_slot: Arc<Mutex<Option<Arc<dyn ScriptBackend>>>> = Arc::new(Mutex::new(None));
        let pending_signal: Arc<Mutex<Option<Signal>>> = Arc::new(Mutex::new(None));

        {
            let name = name.clone();
            let exit_one_shot = exit_one_shot.clone();
            let exited = exited.clone();
            let backend_slot = backend_slot.clone();
            let pending_signal = pending_signal.clone();
            tokio::spawn(async move {
                match factory().await {
                    Ok(components) => {
                        debug!(name = %name, "spawn factory resolved");
                        let real_stdin = components.stdin;
                        tokio::spawn(async move {
                            while let Some(event) = early_rx.recv().await {
                                match event {
                                    StdinEvent::Data(chunk) => real_stdin.write(chunk),
                                    StdinEvent::Err(err) => {
                                        real_stdin.write_error(err);
                                        return;
                                    }
                                }
                            }
                            real_stdin.close();
                        });
                        let _ = stdout_tx.send(components.stdout);
                        let _ = stderr_tx.send(components.stderr);
                        *backend_slot.lock().unwrap() = Some(components.kill.clone());
                        if let Some(sig) = pending_signal.lock().unwrap().take() {
                            let backend = components.kill.clone();
                            tokio::spawn(async move {
                                backend.kill(sig).await;
                            });
                        }
                        let code = components.exit_code.await;
                        exited.store(true, Ordering::Release);
                        exit_one_shot.complete(code);
                    }
                    Err(err) => {
                        debug!(name = %name, error = %err, "spawn factory failed");
                        let _ = stdout_tx.send(Box::pin(futures::stream::empty()) as ByteStream);
                        let message = err.to_string();
                        let _ = stderr_tx.send(Box::pin(futures::stream::once(async move {
                            format!("{message}\n").into_bytes()
                        })) as ByteStream);
                        exited.store(true, Ordering::Release);
                        exit_one_shot.complete(err.exit_code());
                    }
                }
            });
        }

        let done = wire_lifecycle(
            &name,
            &stdout_port,
            &stderr_port,
            &exit_one_shot,
            Arc::new(Mutex::new(None)),
        );
        register_with_ambient(&done);

        Script {
            name,
            stdin: early_stdin,
            stdout: stdout_port,
            stderr: stderr_port,
            exit_code: exit_one_shot,
            done,
            backend: backend_slot,
            pending_signal,
            exited,
        }
    }
}

/// Registers this Script's completion with the innermost ambient capture's
/// child tracker, if any — new Scripts created inside a capture callback
/// register themselves with the context's child tracker before entering
/// their grace window. A no-op outside any capture frame.
fn register_with_ambient(done: &Arc<DelayedOneShot<Result<(), ScriptError>>>) {
    if let Some(ctx) = context::current() {
        let done = done.clone();
        ctx.children.register(async move { done.ready().await });
    }
}

/// If a capture frame is active and has already completed, builds the dead
/// Script a construction attempt resolves to instead of creating a real
/// one — construction stays infallible. Other failure modes (spawn
/// failure, capture throw) are likewise represented as an already-failed
/// Script rather than a `Result`, so this follows the same shape.
fn capture_closed_script(name: Arc<str>) -> Option<Script> {
    let ctx = context::current()?;
    if !ctx.is_closed() {
        return None;
    }
    let err = ScriptError::CaptureClosed {
        name: ctx.name.to_string(),
    };
    let stdout_port = ScriptPort::new(
        Box::pin(futures::stream::empty()),
        StreamKind::Stdout,
        name.clone(),
    );
    let stderr_port = ScriptPort::new(
        Box::pin(futures::stream::empty()),
        StreamKind::Stderr,
        name.clone(),
    );
    let exit_one_shot = Arc::new(DelayedOneShot::new());
    exit_one_shot.complete(exit::UNHANDLED_EXCEPTION);
    exit_one_shot.release();
    let done = Arc::new(DelayedOneShot::new());
    done.complete(Err(err));
    done.release();
    let (stdin, _rx) = StdinSink::new();
    Some(Script {
        name,
        stdin,
        stdout: stdout_port,
        stderr: stderr_port,
        exit_code: exit_one_shot,
        done,
        backend: Arc::new(Mutex::new(Some(Arc::new(NoSignalBackend) as Arc<dyn ScriptBackend>))),
        pending_signal: Arc::new(Mutex::new(None)),
        exited: Arc::new(AtomicBool::new(true)),
    })
}

/// Shared plumbing for the grace window / done-gate release timing —
/// identical for every construction variant once its ports and exit-code
/// one-shot exist.
fn wire_lifecycle(
    name: &Arc<str>,
    stdout_port: &ScriptPort,
    stderr_port: &ScriptPort,
    exit_one_shot: &Arc<DelayedOneShot<i32>>,
    error_override: Arc<Mutex<Option<ScriptError>>>,
) -> Arc<DelayedOneShot<Result<(), ScriptError>>> {
    let done_gate = Arc::new(DelayedOneShot::new());

    {
        let stdout_port = stdout_port.clone();
        let stderr_port = stderr_port.clone();
        // Captured synchronously, on the caller's task: `tokio::spawn`
        // starts a new task that does not inherit whatever `AMBIENT`
        // task-local was active here, so `context::current()` would
        // always see `None` if called from inside the spawned future.
        let ambient = context::current();
        tokio::spawn(async move {
            wait_grace_or_consumed(stdout_port.consumed_flag(), stderr_port.consumed_flag()).await;
            stdout_port.attach_if_unconsumed(ambient.as_ref());
            stderr_port.attach_if_unconsumed(ambient.as_ref());
        });
    }

    {
        let name = name.clone();
        let done_gate = done_gate.clone();
        let exit_one_shot = exit_one_shot.clone();
        let stdout_flag = stdout_port.consumed_flag();
        let stderr_flag = stderr_port.consumed_flag();
        tokio::spawn(async move {
            let code = exit_one_shot.ready().await;
            let result = if code == exit::SUCCESS {
                Ok(())
            } else if let Some(err) = error_override.lock().unwrap().take() {
                Err(err)
            } else {
                Err(ScriptError::ScriptFailed {
                    name: name.to_string(),
                    exit_code: code,
                })
            };
            done_gate.complete(result);
            wait_grace_or_consumed(stdout_flag, stderr_flag).await;
            done_gate.release();
        });
    }

    done_gate
}

#[cfg(test)]
#[path = "script_tests.rs"]
mod tests;
