//! Argument tokenizer: splits a command line into an executable plus
//! argument tokens, honoring quoting, escapes, and glob expansion.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("unterminated quote in command line")]
    UnterminatedQuote,
    #[error("command line has no executable token")]
    Empty,
    #[error("glob pattern {pattern:?} failed: {message}")]
    Glob { pattern: String, message: String },
}

/// Tokenizer behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenizeOptions {
    /// Expand unquoted `*`/`?`/`[...]` tokens against a root directory.
    /// Defaults to off on Windows.
    pub expand_globs: bool,
}

impl Default for TokenizeOptions {
    fn default() -> Self {
        Self {
            expand_globs: !cfg!(windows),
        }
    }
}

/// Splits `cmdline` into `(executable, args)`. Double- and single-quoted
/// spans preserve their contents literally (no escape processing inside
/// single quotes); a backslash outside any quote, or before `"` or `\`
/// inside double quotes, escapes the next character. Unquoted glob tokens
/// are expanded against `root` when `options.expand_globs` is set; a glob
/// with no matches passes through unchanged, matching shell `nullglob`-off
/// behavior.
pub fn parse(
    cmdline: &str,
    root: &Path,
    options: TokenizeOptions,
) -> Result<(String, Vec<String>), TokenizeError> {
    let mut tokens = split(cmdline)?.into_iter();
    let executable = tokens.next().ok_or(TokenizeError::Empty)?.text;

    let mut args = Vec::new();
    for token in tokens {
        if options.expand_globs && !token.quoted && is_glob(&token.text) {
            args.extend(expand_glob(&token.text, root)?);
        } else {
            args.push(token.text);
        }
    }
    Ok((executable, args))
}

struct RawToken {
    text: String,
    quoted: bool,
}

fn split(cmdline: &str) -> Result<Vec<RawToken>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut chars = cmdline.chars().peekable();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut token_is_quoted = false;
    let mut has_token = false;

    while let Some(c) = chars.next() {
        match quote {
            None => match c {
                ' ' | '\t' => {
                    if has_token {
                        tokens.push(RawToken {
                            text: std::mem::take(&mut current),
                            quoted: token_is_quoted,
                        });
                        has_token = false;
                        token_is_quoted = false;
                    }
                }
                '\'' | '"' => {
                    quote = Some(c);
                    token_is_quoted = true;
                    has_token = true;
                }
                '\\' => {
                    has_token = true;
                    current.push(chars.next().unwrap_or('\\'));
                }
                other => {
                    has_token = true;
                    current.push(other);
                }
            },
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            Some('"') => match c {
                '"' => quote = None,
                '\\' if matches!(chars.peek(), Some('"') | Some('\\')) => {
                    current.push(chars.next().expect("peeked"));
                }
                other => current.push(other),
            },
            Some(_) => unreachable!("only ' and \" are ever pushed as the active quote"),
        }
    }

    if quote.is_some() {
        return Err(TokenizeError::UnterminatedQuote);
    }
    if has_token {
        tokens.push(RawToken {
            text: current,
            quoted: token_is_quoted,
        });
    }
    Ok(tokens)
}

fn is_glob(text: &str) -> bool {
    text.contains(['*', '?', '['])
}

fn expand_glob(pattern: &str, root: &Path) -> Result<Vec<String>, TokenizeError> {
    let full_pattern = root.join(pattern);
    let full_pattern = full_pattern.to_string_lossy().into_owned();

    let mut matches: Vec<String> = glob::glob(&full_pattern)
        .map_err(|err| TokenizeError::Glob {
            pattern: pattern.to_string(),
            message: err.to_string(),
        })?
        .filter_map(Result::ok)
        .map(|path| path.to_string_lossy().into_owned())
        .collect();

    if matches.is_empty() {
        matches.push(pattern.to_string());
    } else {
        matches.sort();
    }
    Ok(matches)
}

#[cfg(test)]
#[path = "tokenize_tests.rs"]
mod tests;
