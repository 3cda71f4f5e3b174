//! Process-wide application state shared by every connection's router.
//!
//! `currentModel` and `preferences` are global: a write from any
//! connection is visible to all. How concurrent writers are handled is a
//! policy choice made at startup:
//!
//! - [`SerializedState`]: one lock around everything; `upsert_preference`
//!   is an atomic read-modify-write.
//! - [`UnguardedState`]: read-copy-write in two separate lock acquisitions
//!   with a suspension point in between. Concurrent upserts can lose
//!   updates; last writer wins.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type Preferences = BTreeMap<String, String>;

/// Shared state seen by the router.
#[async_trait]
pub trait AppState: Send + Sync {
    async fn current_model(&self) -> String;

    async fn set_current_model(&self, model: String);

    /// Insert or overwrite `key`, returning the map as this writer saw it
    /// after the write.
    async fn upsert_preference(&self, key: String, value: String) -> Preferences;

    async fn preferences(&self) -> Preferences;
}

/// Concurrency policy for [`AppState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatePolicy {
    #[default]
    Serialized,
    Unguarded,
}

impl StatePolicy {
    pub fn build(self, initial_model: &str) -> Arc<dyn AppState> {
        match self {
            StatePolicy::Serialized => Arc::new(SerializedState::new(initial_model)),
            StatePolicy::Unguarded => Arc::new(UnguardedState::new(initial_model)),
        }
    }
}

impl std::str::FromStr for StatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serialized" => Ok(StatePolicy::Serialized),
            "unguarded" => Ok(StatePolicy::Unguarded),
            other => Err(format!("unknown state policy: {other}")),
        }
    }
}

#[derive(Debug)]
struct StateInner {
    current_model: String,
    preferences: Preferences,
}

/// Single-lock state: every operation is atomic.
#[derive(Debug)]
pub struct SerializedState {
    inner: RwLock<StateInner>,
}

impl SerializedState {
    pub fn new(initial_model: &str) -> Self {
        Self {
            inner: RwLock::new(StateInner {
                current_model: initial_model.to_string(),
                preferences: Preferences::new(),
            }),
        }
    }
}

#[async_trait]
impl AppState for SerializedState {
    async fn current_model(&self) -> String {
        self.inner.read().await.current_model.clone()
    }

    async fn set_current_model(&self, model: String) {
        self.inner.write().await.current_model = model;
    }

    async fn upsert_preference(&self, key: String, value: String) -> Preferences {
        let mut inner = self.inner.write().await;
        inner.preferences.insert(key, value);
        inner.preferences.clone()
    }

    async fn preferences(&self) -> Preferences {
        self.inner.read().await.preferences.clone()
    }
}

/// Lost-update-prone state: snapshot, modify, write back.
#[derive(Debug)]
pub struct UnguardedState {
    current_model: RwLock<String>,
    preferences: RwLock<Preferences>,
}

impl UnguardedState {
    pub fn new(initial_model: &str) -> Self {
        Self {
            current_model: RwLock::new(initial_model.to_string()),
            preferences: RwLock::new(Preferences::new()),
        }
    }
}

#[async_trait]
impl AppState for UnguardedState {
    async fn current_model(&self) -> String {
        self.current_model.read().await.clone()
    }

    async fn set_current_model(&self, model: String) {
        *self.current_model.write().await = model;
    }

    async fn upsert_preference(&self, key: String, value: String) -> Preferences {
        let mut snapshot = self.preferences.read().await.clone();
        // Other writers may run here; their changes are overwritten below.
        tokio::task::yield_now().await;
        snapshot.insert(key, value);
        *self.preferences.write().await = snapshot.clone();
        snapshot
    }

    async fn preferences(&self) -> Preferences {
        self.preferences.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(state: Arc<dyn AppState>) {
        assert_eq!(state.current_model().await, "m0");
        state.set_current_model("m1".into()).await;
        assert_eq!(state.current_model().await, "m1");

        let snap = state.upsert_preference("k".into(), "v".into()).await;
        assert_eq!(snap.get("k").map(String::as_str), Some("v"));
        state.upsert_preference("k".into(), "v2".into()).await;
        assert_eq!(
            state.preferences().await.get("k").map(String::as_str),
            Some("v2")
        );
    }

    #[tokio::test]
    async fn both_policies_persist_sequential_writes() {
        exercise(StatePolicy::Serialized.build("m0")).await;
        exercise(StatePolicy::Unguarded.build("m0")).await;
    }

    #[tokio::test]
    async fn serialized_keeps_every_concurrent_upsert() {
        let state = StatePolicy::Serialized.build("m0");
        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let state = state.clone();
                tokio::spawn(async move {
                    state.upsert_preference(format!("k{i}"), i.to_string()).await;
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(state.preferences().await.len(), 50);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unguarded_loses_interleaved_upserts() {
        let state = StatePolicy::Unguarded.build("m0");
        tokio::join!(
            state.upsert_preference("a".into(), "1".into()),
            state.upsert_preference("b".into(), "2".into()),
        );
        // Both writers read the empty map before either wrote back.
        assert_eq!(state.preferences().await.len(), 1);
    }

    #[tokio::test]
    async fn model_writes_are_global() {
        let state = StatePolicy::Serialized.build("m0");
        let other_connection = state.clone();
        other_connection.set_current_model("X".into()).await;
        assert_eq!(state.current_model().await, "X");
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!("serialized".parse::<StatePolicy>(), Ok(StatePolicy::Serialized));
        assert_eq!("unguarded".parse::<StatePolicy>(), Ok(StatePolicy::Unguarded));
        assert!("locked".parse::<StatePolicy>().is_err());
        assert_eq!(StatePolicy::default(), StatePolicy::Serialized);
    }
}
