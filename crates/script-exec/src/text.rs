//! Regex-based line transforms: `grep` and `replace`, built on the `regex`
//! crate and registered with `script-core`'s `Script::from_line_transform`
//! the same way any other `Fn(LineStream) -> LineStream` adapter is — no
//! special-casing in the core for the fact that these happen to use regex
//! underneath.

use std::sync::Arc;

use futures::StreamExt;
use regex::Regex;
use thiserror::Error;

use script_core::{LineStream, Script};

#[derive(Debug, Error, Clone)]
pub enum TextError {
    #[error("invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("`exclude` and `only_matching` cannot both be set")]
    ConflictingFlags,
}

/// Behavior flags shared by [`grep`] and [`replace`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GrepOptions {
    /// Keep lines that do *not* match, instead of ones that do.
    pub exclude: bool,
    /// Emit only the matched substring rather than the whole line.
    /// Conflicts with `exclude` (there is nothing to emit for a line that
    /// was excluded for *not* matching).
    pub only_matching: bool,
}

fn compile(pattern: &str) -> Result<Regex, TextError> {
    Regex::new(pattern).map_err(|err| TextError::InvalidPattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })
}

/// A line-filtering Script: keeps (or, with [`GrepOptions::exclude`],
/// drops) lines matching `pattern`.
pub fn grep(
    name: impl Into<Arc<str>>,
    pattern: &str,
    options: GrepOptions,
) -> Result<Script, TextError> {
    if options.exclude && options.only_matching {
        return Err(TextError::ConflictingFlags);
    }
    let regex = compile(pattern)?;
    Ok(Script::from_line_transform(name, move |lines: LineStream| {
        Box::pin(lines.filter_map(move |line| {
            let regex = regex.clone();
            async move {
                let is_match = regex.is_match(&line);
                match (is_match, options.exclude, options.only_matching) {
                    (true, false, true) => regex.find(&line).map(|m| m.as_str().to_string()),
                    (true, false, false) => Some(line),
                    (false, true, _) => Some(line),
                    _ => None,
                }
            }
        }))
    }))
}

/// A line-rewriting Script: replaces every match of `pattern` in each line
/// with `replacement` (`$1`-style capture references supported via the
/// `regex` crate's replacement syntax).
pub fn replace(name: impl Into<Arc<str>>, pattern: &str, replacement: &str) -> Result<Script, TextError> {
    let regex = compile(pattern)?;
    let replacement = replacement.to_string();
    Ok(Script::from_line_map(name, move |line| {
        regex.replace_all(&line, replacement.as_str()).into_owned()
    }))
}

#[cfg(test)]
#[path = "text_tests.rs"]
mod tests;
