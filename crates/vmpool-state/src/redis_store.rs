//! Redis-backed state store.
//!
//! Wraps an async connection manager (auto-reconnecting, cheap to clone) and
//! maps the trait surface onto the matching Redis commands. Batches execute
//! as a Redis pipeline: one round-trip, per-command application, no
//! transaction.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use vmpool_core::RedisConfig;

use crate::error::{StateError, StateResult};
use crate::pipeline::{Command, Pipeline};
use crate::store::StateStore;

/// State store backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the server answers PING.
    pub async fn connect(config: &RedisConfig) -> StateResult<Self> {
        let client = redis::Client::open(config.url())
            .map_err(|e| StateError::Connect(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StateError::Connect(e.to_string()))?;

        let store = Self { manager };
        store.ping().await?;
        debug!(host = %config.host, port = %config.port, ssl = config.ssl, "connected to redis");
        Ok(store)
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> StateResult<Option<String>> {
        let mut con = self.connection();
        con.get(key)
            .await
            .map_err(|e| StateError::Read(format!("GET {key}: {e}")))
    }

    async fn set(&self, key: &str, value: &str) -> StateResult<()> {
        let mut con = self.connection();
        let _: () = con
            .set(key, value)
            .await
            .map_err(|e| StateError::Write(format!("SET {key}: {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StateResult<()> {
        let mut con = self.connection();
        let _: () = con
            .del(key)
            .await
            .map_err(|e| StateError::Write(format!("DEL {key}: {e}")))?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> StateResult<Vec<String>> {
        let mut con = self.connection();
        con.keys(pattern)
            .await
            .map_err(|e| StateError::Read(format!("KEYS {pattern}: {e}")))
    }

    async fn sadd(&self, set: &str, member: &str) -> StateResult<()> {
        let mut con = self.connection();
        let _: () = con
            .sadd(set, member)
            .await
            .map_err(|e| StateError::Write(format!("SADD {set}: {e}")))?;
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> StateResult<()> {
        let mut con = self.connection();
        let _: () = con
            .srem(set, member)
            .await
            .map_err(|e| StateError::Write(format!("SREM {set}: {e}")))?;
        Ok(())
    }

    async fn smembers(&self, set: &str) -> StateResult<Vec<String>> {
        let mut con = self.connection();
        con.smembers(set)
            .await
            .map_err(|e| StateError::Read(format!("SMEMBERS {set}: {e}")))
    }

    async fn spop(&self, set: &str, count: usize) -> StateResult<Vec<String>> {
        let mut con = self.connection();
        redis::cmd("SPOP")
            .arg(set)
            .arg(count)
            .query_async(&mut con)
            .await
            .map_err(|e| StateError::Read(format!("SPOP {set}: {e}")))
    }

    async fn exec(&self, pipeline: Pipeline) -> StateResult<()> {
        if pipeline.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for command in pipeline.commands() {
            match command {
                Command::Set { key, value } => {
                    pipe.set(key, value).ignore();
                }
                Command::SAdd { set, member } => {
                    pipe.sadd(set, member).ignore();
                }
                Command::SRem { set, member } => {
                    pipe.srem(set, member).ignore();
                }
                Command::Delete { key } => {
                    pipe.del(key).ignore();
                }
            }
        }

        let mut con = self.connection();
        let _: () = pipe
            .query_async(&mut con)
            .await
            .map_err(|e| StateError::Batch(e.to_string()))?;
        Ok(())
    }

    async fn ping(&self) -> StateResult<()> {
        let mut con = self.connection();
        let reply: String = redis::cmd("PING")
            .query_async(&mut con)
            .await
            .map_err(|e| StateError::Ping(e.to_string()))?;
        if reply != "PONG" {
            return Err(StateError::Ping(format!("unexpected reply: {reply}")));
        }
        Ok(())
    }
}
