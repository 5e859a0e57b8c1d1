//! Environment overlay: a set of additions/removals applied on top of a
//! base environment, plus `with_env` to scope an overlay over an async
//! callback via the ambient script context.

use std::collections::HashMap;
use std::future::Future;

use script_core::{current, with_context};

fn normalize_key(key: &str) -> String {
    if cfg!(windows) {
        key.to_uppercase()
    } else {
        key.to_string()
    }
}

/// A set of environment variable overrides. `None` means "unset this key
/// even if the base environment provides it"; `Some(value)` sets it.
#[derive(Debug, Clone, Default)]
pub struct EnvOverlay {
    entries: HashMap<String, Option<String>>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(normalize_key(&key.into()), Some(value.into()));
        self
    }

    pub fn unset(&mut self, key: impl Into<String>) -> &mut Self {
        self.entries.insert(normalize_key(&key.into()), None);
        self
    }

    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries
            .get(&normalize_key(key))
            .map(|value| value.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Option<String>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Resolve this overlay into a concrete `key -> value` map. `base` seeds
    /// the result when `include_parent` is set; overlay entries are applied
    /// on top, with `None` entries removing the key.
    pub fn resolve(
        &self,
        base: &HashMap<String, String>,
        include_parent: bool,
    ) -> HashMap<String, String> {
        let mut resolved: HashMap<String, String> = if include_parent {
            base.iter()
                .map(|(k, v)| (normalize_key(k), v.clone()))
                .collect()
        } else {
            HashMap::new()
        };
        for (key, value) in &self.entries {
            match value {
                Some(value) => {
                    resolved.insert(key.clone(), value.clone());
                }
                None => {
                    resolved.remove(key);
                }
            }
        }
        resolved
    }

    fn merge_into(&self, target: &mut HashMap<String, Option<String>>) {
        for (key, value) in &self.entries {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Runs `cb` with `overlay` applied on top of the ambient script context's
/// environment (if any). When there is no enclosing script context, there
/// is no ambient environment to scope, so `cb` just runs directly.
pub async fn with_env<F, Fut, T>(overlay: EnvOverlay, include_parent: bool, cb: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let Some(ctx) = current() else {
        return cb().await;
    };

    let mut entries: HashMap<String, Option<String>> = if include_parent {
        (*ctx.env_overlay).clone()
    } else {
        HashMap::new()
    };
    overlay.merge_into(&mut entries);

    let scoped = ctx.with_env_overlay(entries);

    with_context(scoped, cb()).await
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
