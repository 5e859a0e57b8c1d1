//! Pipeline composer: wires N Scripts end-to-end with a pipefail-style exit
//! code and in-order signal routing.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::ScriptError;
use crate::exit;
use crate::script::{ExitFuture, Script, ScriptBackend, ScriptComponents, Signal};

struct PipelineBackend {
    items: Vec<Arc<Script>>,
}

#[async_trait]
impl ScriptBackend for PipelineBackend {
    async fn kill(&self, signal: Signal) -> bool {
        // Offers the signal to each item in order, short-circuiting on
        // first acceptance.
        for item in &self.items {
            if item.kill(signal).await {
                return true;
            }
        }
        false
    }
}

/// Pipes `items[i].stdout` into `items[i + 1].stdin` for every adjacent
/// pair and returns a Script exposing `items[0].stdin`, the last item's
/// stdout/stderr, and a pipefail-style composite exit code. An empty
/// `items` is [`ScriptError::InvalidInput`]; a single item passes through
/// unchanged.
pub fn build_pipeline(items: Vec<Script>) -> Result<Script, ScriptError> {
    if items.is_empty() {
        return Err(ScriptError::InvalidInput(
            "pipeline requires at least one script".to_string(),
        ));
    }
    if items.len() == 1 {
        return Ok(items.into_iter().next().expect("checked len == 1"));
    }

    let items: Vec<Arc<Script>> = items.into_iter().map(Arc::new).collect();
    let name: Arc<str> = Arc::from(
        items
            .iter()
            .map(|s| s.name().to_string())
            .collect::<Vec<_>>()
            .join(" | "),
    );

    for pair in items.windows(2) {
        let upstream = pair[0].clone();
        let downstream = pair[1].clone();
        let mut stdout = upstream.stdout()?;
        let next_stdin = downstream.stdin().clone();
        tokio::spawn(async move {
            while let Some(chunk) = stdout.next().await {
                next_stdin.write(chunk);
            }
            next_stdin.close();
        });
    }

    let stdin = items[0].stdin().clone();
    let last = items.last().expect("checked non-empty above").clone();
    let stdout = last.stdout()?;
    // Intermediate stderrs are not merged into the composite's stderr;
    // only the last component's is.
    let stderr = last.stderr()?;

    let exit_items = items.clone();
    let exit_code: ExitFuture = Box::pin(async move {
        let codes = futures::future::join_all(exit_items.iter().map(|item| item.exit_code())).await;
        codes
            .into_iter()
            .rev()
            .find(|&code| code != 0)
            .unwrap_or(exit::SUCCESS)
    });

    let components = ScriptComponents {
        stdin,
        stdout,
        stderr,
        exit_code,
        kill: Arc::new(PipelineBackend { items: items.clone() }),
    };

    Ok(Script::from_components(name, components))
}

/// An unbuilt chain of Scripts assembled with `|`, mirroring the builder
/// style of `Command::pipe` in shell-composition crates. Call
/// [`Pipeline::build`] to wire it into a composite Script.
pub struct Pipeline {
    items: Vec<Script>,
}

impl Pipeline {
    pub fn build(self) -> Result<Script, ScriptError> {
        build_pipeline(self.items)
    }
}

impl std::ops::BitOr<Script> for Script {
    type Output = Pipeline;

    fn bitor(self, rhs: Script) -> Pipeline {
        Pipeline {
            items: vec![self, rhs],
        }
    }
}

impl std::ops::BitOr<Script> for Pipeline {
    type Output = Pipeline;

    fn bitor(mut self, rhs: Script) -> Pipeline {
        self.items.push(rhs);
        self
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
