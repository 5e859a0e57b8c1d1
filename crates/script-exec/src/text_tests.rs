use futures::StreamExt;

use super::*;

async fn lines_through(script: Script, input: &[&str]) -> Vec<String> {
    for line in input {
        script.stdin().write(format!("{line}\n").into_bytes());
    }
    script.stdin().close();
    let mut lines = script.lines().unwrap();
    let mut out = Vec::new();
    while let Some(line) = lines.next().await {
        out.push(line);
    }
    out
}

#[tokio::test]
async fn grep_keeps_only_matching_lines() {
    let script = grep("grep", "^err", GrepOptions::default()).unwrap();
    let out = lines_through(script, &["error: boom", "ok", "errno", "fine"]).await;
    assert_eq!(out, vec!["error: boom".to_string(), "errno".to_string()]);
}

#[tokio::test]
async fn grep_exclude_drops_matching_lines() {
    let script = grep(
        "grep-v",
        "^err",
        GrepOptions {
            exclude: true,
            only_matching: false,
        },
    )
    .unwrap();
    let out = lines_through(script, &["error", "ok", "fine"]).await;
    assert_eq!(out, vec!["ok".to_string(), "fine".to_string()]);
}

#[tokio::test]
async fn grep_only_matching_emits_just_the_match() {
    let script = grep(
        "grep-o",
        r"\d+",
        GrepOptions {
            exclude: false,
            only_matching: true,
        },
    )
    .unwrap();
    let out = lines_through(script, &["id=42 name=x", "no digits here"]).await;
    assert_eq!(out, vec!["42".to_string()]);
}

#[test]
fn grep_rejects_exclude_and_only_matching_together() {
    let err = grep(
        "bad",
        "x",
        GrepOptions {
            exclude: true,
            only_matching: true,
        },
    )
    .unwrap_err();
    assert!(matches!(err, TextError::ConflictingFlags));
}

#[test]
fn grep_rejects_invalid_pattern() {
    let err = grep("bad-pattern", "(unclosed", GrepOptions::default()).unwrap_err();
    assert!(matches!(err, TextError::InvalidPattern { .. }));
}

#[tokio::test]
async fn replace_rewrites_every_match_per_line() {
    let script = replace("replace", "foo", "bar").unwrap();
    let out = lines_through(script, &["foo foo baz", "nothing"]).await;
    assert_eq!(out, vec!["bar bar baz".to_string(), "nothing".to_string()]);
}

#[tokio::test]
async fn replace_supports_capture_references() {
    let script = replace("replace-cap", r"(\w+)@(\w+)", "$2:$1").unwrap();
    let out = lines_through(script, &["user@host"]).await;
    assert_eq!(out, vec!["host:user".to_string()]);
}
