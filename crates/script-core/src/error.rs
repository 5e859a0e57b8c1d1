//! The error taxonomy surfaced by the Script runtime.

use std::fmt;

/// Which of a Script's two output ports an operation was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Errors produced by the Script runtime.
///
/// `exit_code` sentinels (`256`, `257`, `143`) are carried as plain `i32`
/// fields rather than further enum variants — see [`crate::exit`] for the
/// typed constants a caller should match against.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ScriptError {
    /// A subprocess could not be started (`exit_code = 256`).
    #[error("failed to spawn '{name}': {message}")]
    SpawnFailed { name: String, message: String },

    /// A Script terminated with a non-zero exit code.
    ///
    /// Construction invariant: `exit_code != 0`.
    #[error("script '{name}' failed with exit code {exit_code}")]
    ScriptFailed { name: String, exit_code: i32 },

    /// A Script was registered (or attempted registration) in a capture
    /// frame that has already completed.
    #[error("capture '{name}' is closed; cannot register new scripts")]
    CaptureClosed { name: String },

    /// A second subscriber tried to attach to an already-consumed stream,
    /// or attached after the grace window handed the stream to ambient
    /// stdio.
    #[error("{stream} of script '{name}' was already consumed")]
    AlreadyConsumed { name: String, stream: StreamKind },

    /// Malformed composition input: an empty pipeline, conflicting
    /// transform flags, and similar construction-time mistakes.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A non-Script exception unwound out of a capture callback
    /// (`exit_code = 257`).
    #[error("Error in {name}:\n{message}\n{chain}")]
    UnhandledInCapture {
        name: String,
        message: String,
        chain: String,
    },
}

impl ScriptError {
    /// The sentinel exit code this error implies.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SpawnFailed { .. } => crate::exit::SPAWN_FAILED,
            Self::ScriptFailed { exit_code, .. } => *exit_code,
            Self::UnhandledInCapture { .. } => crate::exit::UNHANDLED_EXCEPTION,
            Self::CaptureClosed { .. } | Self::AlreadyConsumed { .. } | Self::InvalidInput(_) => {
                crate::exit::UNHANDLED_EXCEPTION
            }
        }
    }

    /// The script name this error is about, if it names one.
    pub fn script_name(&self) -> Option<&str> {
        match self {
            Self::SpawnFailed { name, .. }
            | Self::ScriptFailed { name, .. }
            | Self::CaptureClosed { name }
            | Self::AlreadyConsumed { name, .. }
            | Self::UnhandledInCapture { name, .. } => Some(name),
            Self::InvalidInput(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_spawn_failed() {
        let err = ScriptError::SpawnFailed {
            name: "curl".into(),
            message: "no such file or directory".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to spawn 'curl': no such file or directory"
        );
        assert_eq!(err.exit_code(), 256);
    }

    #[test]
    fn display_script_failed() {
        let err = ScriptError::ScriptFailed {
            name: "wc".into(),
            exit_code: 2,
        };
        assert_eq!(err.to_string(), "script 'wc' failed with exit code 2");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn display_capture_closed() {
        let err = ScriptError::CaptureClosed {
            name: "build".into(),
        };
        assert_eq!(
            err.to_string(),
            "capture 'build' is closed; cannot register new scripts"
        );
    }

    #[test]
    fn display_already_consumed() {
        let err = ScriptError::AlreadyConsumed {
            name: "echo".into(),
            stream: StreamKind::Stdout,
        };
        assert_eq!(
            err.to_string(),
            "stdout of script 'echo' was already consumed"
        );
    }

    #[test]
    fn display_invalid_input() {
        let err = ScriptError::InvalidInput("empty pipeline".into());
        assert_eq!(err.to_string(), "invalid input: empty pipeline");
    }

    #[test]
    fn display_unhandled_in_capture() {
        let err = ScriptError::UnhandledInCapture {
            name: "capture".into(),
            message: "boom".into(),
            chain: "at line 12".into(),
        };
        assert_eq!(err.to_string(), "Error in capture:\nboom\nat line 12");
        assert_eq!(err.exit_code(), 257);
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ScriptError>();
    }

    #[test]
    fn script_name_extraction() {
        let err = ScriptError::InvalidInput("x".into());
        assert_eq!(err.script_name(), None);
        let err = ScriptError::ScriptFailed {
            name: "x".into(),
            exit_code: 1,
        };
        assert_eq!(err.script_name(), Some("x"));
    }
}
