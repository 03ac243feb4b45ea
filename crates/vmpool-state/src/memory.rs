//! In-process state store backend.
//!
//! Same observable semantics as the Redis backend (per-key atomicity,
//! all-or-continue batch application, destructive SPOP with arbitrary
//! order), held in plain maps. Used by the loop test suites.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StateResult;
use crate::pipeline::{Command, Pipeline};
use crate::store::StateStore;

#[derive(Default)]
struct Inner {
    values: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
}

/// Ephemeral in-memory state store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(inner: &mut Inner, command: &Command) {
        match command {
            Command::Set { key, value } => {
                inner.values.insert(key.clone(), value.clone());
            }
            Command::SAdd { set, member } => {
                inner.sets.entry(set.clone()).or_default().insert(member.clone());
            }
            Command::SRem { set, member } => {
                if let Some(members) = inner.sets.get_mut(set) {
                    members.remove(member);
                }
            }
            Command::Delete { key } => {
                inner.values.remove(key);
            }
        }
    }
}

fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> StateResult<Option<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StateResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StateResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.values.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> StateResult<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .values
            .keys()
            .filter(|k| pattern_matches(pattern, k))
            .cloned()
            .collect())
    }

    async fn sadd(&self, set: &str, member: &str) -> StateResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> StateResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(members) = inner.sets.get_mut(set) {
            members.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, set: &str) -> StateResult<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn spop(&self, set: &str, count: usize) -> StateResult<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(members) = inner.sets.get_mut(set) else {
            return Ok(Vec::new());
        };
        let popped: Vec<String> = members.iter().take(count).cloned().collect();
        for member in &popped {
            members.remove(member);
        }
        Ok(popped)
    }

    async fn exec(&self, pipeline: Pipeline) -> StateResult<()> {
        let mut inner = self.inner.lock().unwrap();
        for command in pipeline.commands() {
            Self::apply(&mut inner, command);
        }
        Ok(())
    }

    async fn ping(&self) -> StateResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_set_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn keys_prefix_pattern() {
        let store = MemoryStore::new();
        store.set("vmss:instance:a", "1").await.unwrap();
        store.set("vmss:instance:b", "2").await.unwrap();
        store.set("other:key", "3").await.unwrap();

        let mut keys = store.keys("vmss:instance:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["vmss:instance:a", "vmss:instance:b"]);

        assert_eq!(store.keys("other:key").await.unwrap(), vec!["other:key"]);
        assert!(store.keys("missing:*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_membership() {
        let store = MemoryStore::new();
        store.sadd("s", "a").await.unwrap();
        store.sadd("s", "a").await.unwrap();
        store.sadd("s", "b").await.unwrap();

        let mut members = store.smembers("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        store.srem("s", "a").await.unwrap();
        assert_eq!(store.smembers("s").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn spop_is_destructive_and_bounded() {
        let store = MemoryStore::new();
        for member in ["a", "b", "c"] {
            store.sadd("s", member).await.unwrap();
        }

        let popped = store.spop("s", 2).await.unwrap();
        assert_eq!(popped.len(), 2);
        assert_eq!(store.smembers("s").await.unwrap().len(), 1);

        // Asking for more than remains is not an error.
        let rest = store.spop("s", 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(store.smembers("s").await.unwrap().is_empty());
        assert!(store.spop("s", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exec_applies_all_commands() {
        let store = MemoryStore::new();
        store.set("old", "x").await.unwrap();
        store.sadd("set", "old").await.unwrap();

        let mut pipe = Pipeline::new();
        pipe.delete("old")
            .srem("set", "old")
            .set("new", "y")
            .sadd("set", "new");
        store.exec(pipe).await.unwrap();

        assert_eq!(store.get("old").await.unwrap(), None);
        assert_eq!(store.get("new").await.unwrap(), Some("y".to_string()));
        assert_eq!(store.smembers("set").await.unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn empty_exec_is_noop() {
        let store = MemoryStore::new();
        store.exec(Pipeline::new()).await.unwrap();
        assert!(store.ping().await.is_ok());
    }
}
