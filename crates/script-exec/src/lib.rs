//! External interfaces the Script runtime consumes: the argument tokenizer,
//! the process spawner, the environment overlay, and the regex-based line
//! transforms and tempfile helpers. Each is genuinely separable from
//! `script-core` — the core is generic over a spawn factory and a
//! transformer function — but a usable crate needs a concrete
//! implementation of all five, which is what this crate supplies.

pub mod env;
pub mod fsutil;
pub mod spawn;
pub mod text;
pub mod tokenize;

pub use env::{with_env, EnvOverlay};
pub use fsutil::FsError;
pub use spawn::{script, SpawnFailed, SpawnOptions};
pub use text::{grep, replace, GrepOptions, TextError};
pub use tokenize::{TokenizeError, TokenizeOptions};

/// Tokenizes `cmdline` and spawns it as a Script in one step — the common
/// case of "run this shell-style command line", composing the tokenizer
/// and spawner the way a caller almost always wants them.
///
/// `root` anchors glob expansion; pass [`std::env::current_dir`] for
/// ordinary shell-like behavior.
pub fn command(
    name: impl Into<std::sync::Arc<str>>,
    cmdline: &str,
    root: &std::path::Path,
    tokenize_options: tokenize::TokenizeOptions,
    spawn_options: SpawnOptions,
) -> Result<script_core::Script, TokenizeError> {
    let (executable, args) = tokenize::parse(cmdline, root, tokenize_options)?;
    Ok(spawn::script(name, executable, args, spawn_options))
}
