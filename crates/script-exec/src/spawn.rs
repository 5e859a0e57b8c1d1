//! Process spawner: wraps `tokio::process::Command` as a `SubprocessBackend`
//! construction variant of `script-core`'s Script — piped stdio on all
//! three descriptors, `kill_on_drop`, and process-group isolation via
//! `setsid`, wired into the four-port `ScriptComponents` contract.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use script_core::{
    exit, ByteStream, ExitFuture, Script, ScriptBackend, ScriptComponents, ScriptError, Signal,
    StdinEvent, StdinSink,
};

/// A process could not be started at all.
#[derive(Debug, Error, Clone)]
#[error("failed to spawn '{executable}': {message}")]
pub struct SpawnFailed {
    pub executable: String,
    pub message: String,
}

/// Spawn-time options.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub workdir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Whether `env` overlays the parent process's environment, or replaces
    /// it entirely.
    pub include_parent_env: bool,
    /// Run via `sh -c` instead of `exec`ing `executable` directly.
    pub run_in_shell: bool,
}

/// Builds a [`Script`] that runs `executable args...` as a subprocess.
/// Spawning happens on the task that first drives the Script's internal
/// exit-code future; a failure to spawn becomes `ScriptError::SpawnFailed`
/// with `exit_code = 256`.
pub fn script(
    name: impl Into<Arc<str>>,
    executable: impl Into<String>,
    args: Vec<String>,
    options: SpawnOptions,
) -> Script {
    let name: Arc<str> = name.into();
    let executable = executable.into();
    Script::from_spawn_factory(name, move || {
        Box::pin(async move { spawn_components(executable, args, options).await })
    })
}

async fn spawn_components(
    executable: String,
    args: Vec<String>,
    options: SpawnOptions,
) -> Result<ScriptComponents, ScriptError> {
    let mut cmd = if options.run_in_shell {
        let mut shell = Command::new(if cfg!(windows) { "cmd" } else { "sh" });
        if cfg!(windows) {
            shell.arg("/C");
        } else {
            shell.arg("-c");
        }
        let mut full = shell_quote(&executable);
        for arg in &args {
            full.push(' ');
            full.push_str(&shell_quote(arg));
        }
        shell.arg(full);
        shell
    } else {
        let mut cmd = Command::new(&executable);
        cmd.args(&args);
        cmd
    };

    if !options.include_parent_env {
        cmd.env_clear();
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }
    if let Some(dir) = &options.workdir {
        cmd.current_dir(dir);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    // Isolate the child in its own process group so `kill` can signal the
    // whole group.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            debug!(executable = %executable, error = %err, "spawn failed");
            return Err(ScriptError::SpawnFailed {
                name: executable.clone(),
                message: err.to_string(),
            });
        }
    };

    let (stdin, mut stdin_rx) = StdinSink::new();
    if let Some(mut child_stdin) = child.stdin.take() {
        tokio::spawn(async move {
            while let Some(event) = stdin_rx.recv().await {
                match event {
                    StdinEvent::Data(chunk) => {
                        if child_stdin.write_all(&chunk).await.is_err() {
                            break;
                        }
                    }
                    StdinEvent::Err(_) => break,
                }
            }
            let _ = child_stdin.shutdown().await;
        });
    }

    let stdout: ByteStream = child
        .stdout
        .take()
        .map(read_chunks)
        .unwrap_or_else(|| Box::pin(futures::stream::empty()));
    let stderr: ByteStream = child
        .stderr
        .take()
        .map(read_chunks)
        .unwrap_or_else(|| Box::pin(futures::stream::empty()));

    let pid = child.id();
    let killed_signal = Arc::new(AtomicI32::new(0));

    let backend = Arc::new(SubprocessBackend {
        pid,
        killed_signal: killed_signal.clone(),
    });

    let exit_code: ExitFuture = Box::pin(async move {
        match child.wait().await {
            Ok(status) => native_exit_code(status, &killed_signal),
            Err(err) => {
                warn!(executable = %executable, error = %err, "failed waiting for child");
                exit::UNHANDLED_EXCEPTION
            }
        }
    });

    Ok(ScriptComponents {
        stdin,
        stdout,
        stderr,
        exit_code,
        kill: backend,
    })
}

/// Maps a process exit status to a Script exit code. A process terminated
/// by a signal reports the negated signal number, matching the host
/// platform's native `waitpid` convention: `kill()` on a running process
/// resolves `ScriptFailed(name, -15)` for a `SIGTERM`, for example.
#[cfg(unix)]
fn native_exit_code(status: std::process::ExitStatus, killed_signal: &AtomicI32) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        return code;
    }
    if let Some(signal) = status.signal() {
        return -signal;
    }
    let pending = killed_signal.load(Ordering::Acquire);
    if pending != 0 {
        return -pending;
    }
    exit::UNHANDLED_EXCEPTION
}

#[cfg(not(unix))]
fn native_exit_code(status: std::process::ExitStatus, _killed_signal: &AtomicI32) -> i32 {
    status.code().unwrap_or(exit::UNHANDLED_EXCEPTION)
}

fn read_chunks<R>(mut reader: R) -> ByteStream
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    Box::pin(UnboundedReceiverStream::new(rx))
}

struct SubprocessBackend {
    pid: Option<u32>,
    killed_signal: Arc<AtomicI32>,
}

#[async_trait]
impl ScriptBackend for SubprocessBackend {
    async fn kill(&self, signal: Signal) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };
        #[cfg(unix)]
        {
            let sig = unix_signal(signal);
            self.killed_signal.store(sig, Ordering::Release);
            // SAFETY: kill() is async-signal-safe; negative pid targets the
            // process group set up via setsid() at spawn time.
            let rc = unsafe { libc::kill(-(pid as libc::pid_t), sig) };
            rc == 0
        }
        #[cfg(not(unix))]
        {
            let _ = signal;
            false
        }
    }
}

#[cfg(unix)]
fn unix_signal(signal: Signal) -> libc::c_int {
    match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
        Signal::Int => libc::SIGINT,
        Signal::Hup => libc::SIGHUP,
        Signal::Quit => libc::SIGQUIT,
    }
}

/// Quotes `arg` for inclusion in a `sh -c` command line (single-quote the
/// whole argument, escaping embedded single quotes the POSIX-shell way).
fn shell_quote(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(|c| c.is_alphanumeric() || "-_./:=".contains(c)) {
        return arg.to_string();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
