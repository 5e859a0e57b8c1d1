use std::path::Path;

use super::*;

fn root() -> &'static Path {
    Path::new("/tmp")
}

#[test]
fn splits_simple_whitespace_separated_tokens() {
    let (exe, args) = parse("ls -la /tmp", root(), TokenizeOptions { expand_globs: false }).unwrap();
    assert_eq!(exe, "ls");
    assert_eq!(args, vec!["-la", "/tmp"]);
}

#[test]
fn double_quotes_preserve_inner_spaces() {
    let (exe, args) =
        parse(r#"echo "hello world""#, root(), TokenizeOptions { expand_globs: false }).unwrap();
    assert_eq!(exe, "echo");
    assert_eq!(args, vec!["hello world"]);
}

#[test]
fn single_quotes_do_not_process_escapes() {
    let (exe, args) =
        parse(r#"echo 'a\nb'"#, root(), TokenizeOptions { expand_globs: false }).unwrap();
    assert_eq!(exe, "echo");
    assert_eq!(args, vec![r"a\nb"]);
}

#[test]
fn backslash_escapes_outside_quotes() {
    let (exe, args) = parse(r"echo a\ b", root(), TokenizeOptions { expand_globs: false }).unwrap();
    assert_eq!(exe, "echo");
    assert_eq!(args, vec!["a b"]);
}

#[test]
fn unterminated_quote_is_an_error() {
    let err = parse(r#"echo "unterminated"#, root(), TokenizeOptions { expand_globs: false })
        .unwrap_err();
    assert_eq!(err, TokenizeError::UnterminatedQuote);
}

#[test]
fn empty_command_line_is_an_error() {
    let err = parse("   ", root(), TokenizeOptions { expand_globs: false }).unwrap_err();
    assert_eq!(err, TokenizeError::Empty);
}

#[test]
fn quoted_glob_characters_are_not_expanded() {
    let (_, args) =
        parse(r#"echo "*.rs""#, root(), TokenizeOptions { expand_globs: true }).unwrap();
    assert_eq!(args, vec!["*.rs"]);
}

#[test]
fn unquoted_glob_with_no_matches_passes_through_literally() {
    let (_, args) = parse(
        "echo no-such-dir/*.nonexistent",
        root(),
        TokenizeOptions { expand_globs: true },
    )
    .unwrap();
    assert_eq!(args, vec!["no-such-dir/*.nonexistent"]);
}

#[test]
fn default_options_disable_globbing_on_windows_only() {
    let options = TokenizeOptions::default();
    assert_eq!(options.expand_globs, !cfg!(windows));
}
