//! Capture block.
//!
//! `capture(name, cb, on_signal)` runs `cb` with a fresh ambient context
//! installed and produces a Script whose stdout/stderr are that context's
//! stdio groups, and whose exit tracks both `cb` itself and every child
//! Script it registers before completing.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::{self, AmbientContext};
use crate::error::ScriptError;
use crate::exit;
use crate::script::{
    ByteStream, ExitFuture, NoSignalBackend, Script, ScriptBackend, ScriptComponents, Signal,
    StdinEvent, StdinSink,
};

/// The stdin stream handed to a capture callback: whatever bytes the
/// caller writes to the capture Script's own stdin sink.
pub type CaptureStdin = ByteStream;

/// A non-Script error unwinding out of a capture callback, surfaced as
/// exit code `257`.
#[derive(Debug, Clone)]
pub struct CaptureError {
    pub message: String,
    pub chain: String,
}

impl CaptureError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            chain: String::new(),
        }
    }

    pub fn with_chain(message: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            chain: chain.into(),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CaptureError {}

impl From<String> for CaptureError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for CaptureError {
    fn from(message: &str) -> Self {
        Self::new(message.to_string())
    }
}

/// A handler for signals delivered before the capture has completed. Every
/// Script owns a `kill` closure supplied by its factory; this is the
/// capture variant's.
pub type OnSignal = Arc<dyn Fn(Signal) -> BoxFuture<'static, bool> + Send + Sync>;

struct SignalBackend {
    handler: OnSignal,
}

#[async_trait]
impl ScriptBackend for SignalBackend {
    async fn kill(&self, signal: Signal) -> bool {
        (self.handler)(signal).await
    }
}

/// Runs `cb(stdin)` inside a new ambient context.
///
/// `cb`'s stdin is whatever the returned Script's own stdin sink receives.
/// `on_signal`, if given, answers `Script::kill` calls delivered before the
/// capture completes; with `None`, signals are declined the way a plain
/// transformer Script declines them.
pub fn capture<F>(name: impl Into<Arc<str>>, cb: F, on_signal: Option<OnSignal>) -> Script
where
    F: FnOnce(CaptureStdin) -> BoxFuture<'static, Result<(), CaptureError>> + Send + 'static,
{
    let name: Arc<str> = name.into();

    let mut ctx = AmbientContext::new(name.clone());
    if let Some(parent) = context::current() {
        ctx = ctx
            .with_env_overlay((*parent.env_overlay).clone())
            .with_flags(parent.verbose, parent.debug);
    }

    let (stdin, stdin_rx) = StdinSink::new();
    let stdin_stream: CaptureStdin = Box::pin(futures::stream::unfold(stdin_rx, |mut rx| async move {
        match rx.recv().await {
            Some(StdinEvent::Data(chunk)) => Some((chunk, rx)),
            Some(StdinEvent::Err(_)) | None => None,
        }
    }));

    // Claimed now, before the capture's ambient context ever has a chance
    // to race with another subscriber — a capture always owns its own
    // stdio groups' single output stream.
    let stdout_stream = ctx
        .stdout
        .stream()
        .expect("freshly built stdio group has an unclaimed stream");
    let stderr_stream = ctx
        .stderr
        .stream()
        .expect("freshly built stdio group has an unclaimed stream");

    let error_override: Arc<Mutex<Option<ScriptError>>> = Arc::new(Mutex::new(None));

    let exit_code: ExitFuture = {
        let ctx = ctx.clone();
        let name = name.clone();
        let error_override = error_override.clone();
        Box::pin(async move {
            let cb_result = context::with_context(ctx.clone(), cb(stdin_stream)).await;
            let code = match cb_result {
                Err(cb_err) => {
                    ctx.stderr.writeln(ScriptError::UnhandledInCapture {
                        name: name.to_string(),
                        message: cb_err.message,
                        chain: cb_err.chain,
                    });
                    exit::UNHANDLED_EXCEPTION
                }
                Ok(()) => {
                    // Wait for no pending children *and* a quiet scheduling
                    // step before treating the capture as finished.
                    ctx.children.wait_until_idle().await;
                    match ctx.children.first_error() {
                        Some(err) => {
                            let code = err.exit_code();
                            *error_override.lock().unwrap() = Some(err);
                            code
                        }
                        None => exit::SUCCESS,
                    }
                }
            };
            ctx.mark_closed();
            ctx.stdout.close();
            ctx.stderr.close();
            code
        })
    };

    let kill: Arc<dyn ScriptBackend> = match on_signal {
        Some(handler) => Arc::new(SignalBackend { handler }),
        None => Arc::new(NoSignalBackend),
    };

    let components = ScriptComponents {
        stdin,
        stdout: Box::pin(stdout_stream) as ByteStream,
        stderr: Box::pin(stderr_stream) as ByteStream,
        exit_code,
        kill,
    };

    Script::from_components_with_error_override(name, components, error_override)
}

#[cfg(test)]
#[path = "capture_tests.rs"]
mod tests;
