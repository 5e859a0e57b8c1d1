//! Transformer adapters and the line-oriented supplements built on top of
//! them: `Script::lines()` and `xargs`.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::Notify;

use crate::capture::{capture, CaptureError};
use crate::error::ScriptError;
use crate::exit;
use crate::script::{
    ByteStream, ExitFuture, Script, ScriptBackend, ScriptComponents, Signal, StdinEvent, StdinSink,
};

/// A stream of UTF-8 lines, decoded or not-yet-encoded.
pub type LineStream = Pin<Box<dyn Stream<Item = String> + Send>>;

struct TransformBackend {
    cancel: Arc<Notify>,
    killed: Arc<AtomicBool>,
}

#[async_trait]
impl ScriptBackend for TransformBackend {
    async fn kill(&self, _signal: Signal) -> bool {
        // Closes the in-flight transform; exit is forced to 143.
        self.killed.store(true, Ordering::Release);
        self.cancel.notify_one();
        true
    }
}

/// Wraps `stream` so it ends early the moment `cancel` is notified, even if
/// the wrapped stream itself has more items buffered upstream.
fn cancellable(stream: ByteStream, cancel: Arc<Notify>) -> ByteStream {
    Box::pin(futures::stream::unfold(
        (stream, cancel),
        |(mut stream, cancel)| async move {
            tokio::select! {
                biased;
                _ = cancel.notified() => None,
                item = stream.next() => item.map(|chunk| (chunk, (stream, cancel))),
            }
        },
    ))
}

/// Wraps `stream` so `notify` fires (exactly once) the moment it is
/// exhausted — lets the exit-code future observe "transform closed"
/// without itself consuming the stream.
fn watch_close(stream: ByteStream, notify: Arc<Notify>) -> ByteStream {
    Box::pin(futures::stream::unfold(
        Some(stream),
        move |state| {
            let notify = notify.clone();
            async move {
                match state {
                    Some(mut stream) => match stream.next().await {
                        Some(chunk) => Some((chunk, Some(stream))),
                        None => {
                            notify.notify_one();
                            None
                        }
                    },
                    None => None,
                }
            }
        },
    ))
}

/// Splits a byte stream into UTF-8 lines (lossy), buffering partial lines
/// across chunk boundaries. A trailing chunk with no final newline still
/// yields its content as the last line.
pub(crate) fn decode_lines(stream: ByteStream) -> LineStream {
    struct State {
        stream: ByteStream,
        leftover: Vec<u8>,
        pending: std::collections::VecDeque<String>,
        ended: bool,
    }

    Box::pin(futures::stream::unfold(
        State {
            stream,
            leftover: Vec::new(),
            pending: std::collections::VecDeque::new(),
            ended: false,
        },
        |mut state| async move {
            loop {
                if let Some(line) = state.pending.pop_front() {
                    return Some((line, state));
                }
                if state.ended {
                    return None;
                }
                match state.stream.next().await {
                    Some(chunk) => {
                        state.leftover.extend_from_slice(&chunk);
                        while let Some(pos) = state.leftover.iter().position(|&b| b == b'\n') {
                            let mut line: Vec<u8> = state.leftover.drain(..=pos).collect();
                            line.pop();
                            if line.last() == Some(&b'\r') {
                                line.pop();
                            }
                            state
                                .pending
                                .push_back(String::from_utf8_lossy(&line).into_owned());
                        }
                    }
                    None => {
                        state.ended = true;
                        if !state.leftover.is_empty() {
                            let line = String::from_utf8_lossy(&state.leftover).into_owned();
                            state.leftover.clear();
                            state.pending.push_back(line);
                        }
                    }
                }
            }
        },
    ))
}

/// Inverse of [`decode_lines`]: appends a trailing newline to each line.
pub(crate) fn encode_lines(lines: LineStream) -> ByteStream {
    Box::pin(lines.map(|line| {
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        bytes
    }))
}

impl Script {
    /// Stdin flows through `transform`, becoming stdout; stderr stays
    /// empty. `kill` closes the in-flight transform and forces exit code
    /// `143`.
    pub fn from_byte_transform<T>(name: impl Into<Arc<str>>, transform: T) -> Script
    where
        T: FnOnce(ByteStream) -> ByteStream + Send + 'static,
    {
        let (stdin, stdin_rx) = StdinSink::new();
        let raw_input: ByteStream = Box::pin(futures::stream::unfold(stdin_rx, |mut rx| async move {
            match rx.recv().await {
                Some(StdinEvent::Data(chunk)) => Some((chunk, rx)),
                Some(StdinEvent::Err(_)) | None => None,
            }
        }));

        let cancel = Arc::new(Notify::new());
        let killed = Arc::new(AtomicBool::new(false));
        let natural_exit = Arc::new(Notify::new());

        let input = cancellable(raw_input, cancel.clone());
        let output = watch_close(transform(input), natural_exit.clone());

        let exit_code: ExitFuture = {
            let natural_exit = natural_exit.clone();
            let killed = killed.clone();
            Box::pin(async move {
                natural_exit.notified().await;
                if killed.load(Ordering::Acquire) {
                    exit::SIGNALED
                } else {
                    exit::SUCCESS
                }
            })
        };

        let components = ScriptComponents {
            stdin,
            stdout: output,
            stderr: Box::pin(futures::stream::empty()),
            exit_code,
            kill: Arc::new(TransformBackend { cancel, killed }),
        };

        Script::from_components(name, components)
    }

    /// A byte transform bracketed with decode-by-lines / encode-with-newlines.
    pub fn from_line_transform<T>(name: impl Into<Arc<str>>, transform: T) -> Script
    where
        T: FnOnce(LineStream) -> LineStream + Send + 'static,
    {
        Script::from_byte_transform(name, move |bytes| encode_lines(transform(decode_lines(bytes))))
    }

    /// A trivial reduction of a line transform to a per-line map.
    pub fn from_line_map<M>(name: impl Into<Arc<str>>, map: M) -> Script
    where
        M: Fn(String) -> String + Send + Sync + 'static,
    {
        Script::from_line_transform(name, move |lines| Box::pin(lines.map(move |line| map(line))))
    }

    /// Consumes stdout as UTF-8 lines rather than raw bytes, reusing the
    /// line-transform machinery above.
    pub fn lines(&self) -> Result<LineStream, ScriptError> {
        let bytes = self.stdout()?;
        Ok(decode_lines(bytes))
    }
}

/// Chunks `input` into groups of at most `max_args` and calls `cb` once per
/// chunk, each invocation a child Script of one enclosing capture frame.
/// Invocations run sequentially; the first failing one aborts the rest and
/// surfaces as this Script's `257` exit.
pub fn xargs<F>(
    name: impl Into<Arc<str>>,
    input: LineStream,
    cb: F,
    max_args: usize,
) -> Script
where
    F: Fn(Vec<String>) -> Script + Send + Sync + 'static,
{
    let max_args = max_args.max(1);
    capture(
        name,
        move |_stdin| {
            Box::pin(async move {
                let mut input = input;
                let mut chunk = Vec::with_capacity(max_args);
                loop {
                    match input.next().await {
                        Some(item) => {
                            chunk.push(item);
                            if chunk.len() == max_args {
                                run_chunk(&cb, std::mem::take(&mut chunk)).await?;
                            }
                        }
                        None => {
                            if !chunk.is_empty() {
                                run_chunk(&cb, std::mem::take(&mut chunk)).await?;
                            }
                            return Ok(());
                        }
                    }
                }
            })
        },
        None,
    )
}

async fn run_chunk<F>(cb: &F, chunk: Vec<String>) -> Result<(), CaptureError>
where
    F: Fn(Vec<String>) -> Script,
{
    let child = cb(chunk);
    child
        .done()
        .await
        .map_err(|err| CaptureError::new(err.to_string()))
}

#[cfg(test)]
#[path = "transform_tests.rs"]
mod tests;
