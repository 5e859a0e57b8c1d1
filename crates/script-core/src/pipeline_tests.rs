use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::*;
use crate::script::NoSignalBackend;

fn script_from_bytes(name: &'static str, stdout: Vec<u8>, exit_code: i32) -> Script {
    let (stdin, _rx) = StdinSink::new();
    Script::from_components(
        name,
        ScriptComponents {
            stdin,
            stdout: Box::pin(futures::stream::once(async move { stdout })),
            stderr: Box::pin(futures::stream::empty()),
            exit_code: Box::pin(async move { exit_code }),
            kill: Arc::new(NoSignalBackend),
        },
    )
}

#[tokio::test(start_paused = true)]
async fn empty_pipeline_is_invalid_input() {
    let err = build_pipeline(Vec::new()).unwrap_err();
    assert!(matches!(err, ScriptError::InvalidInput(_)));
}

#[tokio::test(start_paused = true)]
async fn single_item_pipeline_passes_through_unchanged() {
    let script = script_from_bytes("only", b"hi".to_vec(), 0);
    let built = build_pipeline(vec![script]).unwrap();
    assert_eq!(built.name(), "only");
    assert_eq!(built.output().await.unwrap(), "hi");
}

#[tokio::test(start_paused = true)]
async fn stdout_flows_through_each_stage() {
    let upstream = script_from_bytes("echo", b"hi".to_vec(), 0);
    let downstream = Script::from_byte_transform("upper", |input| {
        Box::pin(futures::StreamExt::map(input, |chunk| chunk.to_ascii_uppercase()))
    });
    let built = build_pipeline(vec![upstream, downstream]).unwrap();
    assert_eq!(built.output().await.unwrap(), "HI");
    assert!(built.success().await);
}

#[tokio::test(start_paused = true)]
async fn composite_exit_is_the_rightmost_nonzero_code() {
    let a = script_from_bytes("a", Vec::new(), 2);
    let b = script_from_bytes("b", Vec::new(), 5);
    let built = build_pipeline(vec![a, b]).unwrap();
    assert_eq!(built.exit_code().await, 5);
}

#[tokio::test(start_paused = true)]
async fn composite_exit_falls_back_to_an_earlier_nonzero_code() {
    let a = script_from_bytes("a", Vec::new(), 2);
    let b = script_from_bytes("b", Vec::new(), 0);
    let built = build_pipeline(vec![a, b]).unwrap();
    assert_eq!(built.exit_code().await, 2);
}

#[tokio::test(start_paused = true)]
async fn composite_exit_is_zero_when_every_item_succeeds() {
    let a = script_from_bytes("a", Vec::new(), 0);
    let b = script_from_bytes("b", Vec::new(), 0);
    let built = build_pipeline(vec![a, b]).unwrap();
    assert_eq!(built.exit_code().await, exit::SUCCESS);
}

struct Refusing(Arc<AtomicBool>);

#[async_trait]
impl ScriptBackend for Refusing {
    async fn kill(&self, _signal: Signal) -> bool {
        self.0.store(true, Ordering::SeqCst);
        false
    }
}

struct Accepting(Arc<AtomicBool>);

#[async_trait]
impl ScriptBackend for Accepting {
    async fn kill(&self, _signal: Signal) -> bool {
        self.0.store(true, Ordering::SeqCst);
        true
    }
}

fn pending_script(name: &'static str, kill: Arc<dyn ScriptBackend>) -> Script {
    let (stdin, _rx) = StdinSink::new();
    Script::from_components(
        name,
        ScriptComponents {
            stdin,
            stdout: Box::pin(futures::stream::pending()),
            stderr: Box::pin(futures::stream::pending()),
            exit_code: Box::pin(std::future::pending()),
            kill,
        },
    )
}

#[tokio::test(start_paused = true)]
async fn kill_is_offered_to_each_item_in_order_until_one_accepts() {
    let first_asked = Arc::new(AtomicBool::new(false));
    let second_asked = Arc::new(AtomicBool::new(false));
    let first = pending_script("first", Arc::new(Refusing(first_asked.clone())));
    let second = pending_script("second", Arc::new(Accepting(second_asked.clone())));
    let built = build_pipeline(vec![first, second]).unwrap();

    assert!(built.kill(Signal::Term).await);
    assert!(first_asked.load(Ordering::SeqCst));
    assert!(second_asked.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn kill_fails_when_every_item_refuses() {
    let first = pending_script("first", Arc::new(NoSignalBackend));
    let second = pending_script("second", Arc::new(NoSignalBackend));
    let built = build_pipeline(vec![first, second]).unwrap();

    assert!(!built.kill(Signal::Term).await);
}

#[tokio::test(start_paused = true)]
async fn bitor_operator_builds_the_same_pipeline() {
    let a = script_from_bytes("echo", b"hi".to_vec(), 0);
    let b = Script::from_byte_transform("upper", |input| {
        Box::pin(futures::StreamExt::map(input, |chunk| chunk.to_ascii_uppercase()))
    });
    let built = (a | b).build().unwrap();
    assert_eq!(built.output().await.unwrap(), "HI");
}
