//! Script runtime: a shell-script-like composition library built on a
//! uniform four-port contract (stdin / stdout / stderr / exit_code) shared
//! by subprocesses, in-process callbacks, stream transformers, pipelines,
//! and capture blocks alike.
//!
//! See [`Script`] for the central entity and [`capture`] for the component
//! that gives in-process code an ambient stdio context to run child
//! Scripts against.

pub mod error;
pub mod exit;

mod buffered;
mod capture;
mod context;
mod delayed;
mod entangled;
mod pipeline;
mod script;
mod stdio_group;
mod transform;

pub use buffered::{buffered, silence_until_failure, stderr_only, BufferedScript};
pub use capture::{capture, CaptureError, CaptureStdin, OnSignal};
pub use context::{current, with_context, AmbientContext};
pub use error::{Result, ScriptError, StreamKind};
pub use pipeline::{build_pipeline, Pipeline};
pub use script::{
    ByteChunk, ByteStream, ExitFuture, NoSignalBackend, Script, ScriptBackend, ScriptComponents,
    Signal, StdinEvent, StdinSink,
};
pub use stdio_group::{StdioGroup, StdioSink};
pub use transform::{xargs, LineStream};
