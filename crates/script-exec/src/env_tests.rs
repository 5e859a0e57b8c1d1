use std::collections::HashMap;

use script_core::{current, with_context, AmbientContext};

use super::*;

#[test]
fn resolve_with_include_parent_seeds_from_base() {
    let mut base = HashMap::new();
    base.insert("PATH".to_string(), "/usr/bin".to_string());

    let mut overlay = EnvOverlay::new();
    overlay.set("EXTRA", "1");

    let resolved = overlay.resolve(&base, true);
    assert_eq!(resolved.get("PATH").map(String::as_str), Some("/usr/bin"));
    assert_eq!(resolved.get("EXTRA").map(String::as_str), Some("1"));
}

#[test]
fn resolve_without_include_parent_ignores_base() {
    let mut base = HashMap::new();
    base.insert("PATH".to_string(), "/usr/bin".to_string());

    let mut overlay = EnvOverlay::new();
    overlay.set("ONLY", "mine");

    let resolved = overlay.resolve(&base, false);
    assert!(!resolved.contains_key("PATH"));
    assert_eq!(resolved.get("ONLY").map(String::as_str), Some("mine"));
}

#[test]
fn unset_removes_a_key_inherited_from_base() {
    let mut base = HashMap::new();
    base.insert("SECRET".to_string(), "x".to_string());

    let mut overlay = EnvOverlay::new();
    overlay.unset("SECRET");

    let resolved = overlay.resolve(&base, true);
    assert!(!resolved.contains_key("SECRET"));
}

#[tokio::test]
async fn with_env_runs_directly_when_no_ambient_context() {
    let mut overlay = EnvOverlay::new();
    overlay.set("A", "1");
    let result = with_env(overlay, true, || async { 42 }).await;
    assert_eq!(result, 42);
}

#[tokio::test]
async fn with_env_merges_overlay_into_ambient_context() {
    let ctx = AmbientContext::new("root");
    with_context(ctx, async {
        let mut overlay = EnvOverlay::new();
        overlay.set("FOO", "bar");
        with_env(overlay, true, || async {
            let ctx = current().unwrap();
            assert_eq!(
                ctx.env_overlay.get("FOO").cloned().flatten().as_deref(),
                Some("bar")
            );
        })
        .await;
        // Outer context's overlay is unaffected after the scoped call returns.
        assert!(current().unwrap().env_overlay.get("FOO").is_none());
    })
    .await;
}
