use futures::{FutureExt, StreamExt};

use super::*;

fn write_stdout_and_stderr() -> futures::future::BoxFuture<'static, Result<(), CaptureError>> {
    Box::pin(async {
        let ctx = crate::context::current().unwrap();
        ctx.stdout.sink().write(b"out".to_vec());
        ctx.stderr.sink().write(b"err".to_vec());
        Ok(())
    })
}

#[tokio::test(start_paused = true)]
async fn buffered_withholds_both_streams_until_release() {
    let handle = buffered("build", |_stdin| write_stdout_and_stderr(), None);

    let mut stdout = handle.script().stdout().unwrap();
    let mut stderr = handle.script().stderr().unwrap();

    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert!(stdout.next().now_or_never().is_none());
    assert!(stderr.next().now_or_never().is_none());

    handle.release().await;

    assert_eq!(stdout.next().await, Some(b"out".to_vec()));
    assert_eq!(stdout.next().await, None);
    assert_eq!(stderr.next().await, Some(b"err".to_vec()));
    assert_eq!(stderr.next().await, None);
}

#[tokio::test(start_paused = true)]
async fn release_is_idempotent() {
    let handle = buffered("build", |_stdin| Box::pin(async { Ok(()) }), None);
    handle.release().await;
    handle.release().await;
    assert!(handle.script().success().await);
}

#[tokio::test(start_paused = true)]
async fn stderr_only_passes_stdout_through_live() {
    let handle = stderr_only("build", |_stdin| write_stdout_and_stderr(), None);

    let mut stdout = handle.script().stdout().unwrap();
    let mut stderr = handle.script().stderr().unwrap();

    assert_eq!(stdout.next().await, Some(b"out".to_vec()));

    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert!(stderr.next().now_or_never().is_none());

    handle.release().await;
    assert_eq!(stderr.next().await, Some(b"err".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn silence_until_failure_stays_silent_on_success() {
    let script = silence_until_failure("build", |_stdin| Box::pin(async { Ok(()) }), None);
    assert!(script.done().await.is_ok());

    let mut stdout = script.stdout().unwrap();
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert!(stdout.next().now_or_never().is_none());
}

#[tokio::test(start_paused = true)]
async fn silence_until_failure_flushes_everything_when_cb_errors() {
    let script = silence_until_failure(
        "build",
        |_stdin| {
            Box::pin(async {
                let ctx = crate::context::current().unwrap();
                ctx.stderr.sink().write(b"diagnostic".to_vec());
                Err(CaptureError::new("boom"))
            })
        },
        None,
    );

    let mut stderr = script.stderr().unwrap();
    assert!(script.done().await.is_err());

    let mut seen = Vec::new();
    while let Some(chunk) = stderr.next().await {
        seen.push(chunk);
    }
    assert!(seen.contains(&b"diagnostic".to_vec()));
}
