//! The state-store trait every control loop is written against.

use async_trait::async_trait;

use crate::error::StateResult;
use crate::pipeline::Pipeline;

/// String-keyed blob store plus named sets.
///
/// Implementations provide per-key atomicity and single-round-trip batch
/// execution via [`StateStore::exec`]; nothing stronger. Missing keys read
/// as `None`. `spop` removes and returns up to `count` arbitrary members;
/// receiving fewer than requested is not an error.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> StateResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StateResult<()>;

    async fn delete(&self, key: &str) -> StateResult<()>;

    /// Keys matching `pattern`. Only the literal-prefix-plus-trailing-`*`
    /// shape is required of implementations.
    async fn keys(&self, pattern: &str) -> StateResult<Vec<String>>;

    async fn sadd(&self, set: &str, member: &str) -> StateResult<()>;

    async fn srem(&self, set: &str, member: &str) -> StateResult<()>;

    async fn smembers(&self, set: &str) -> StateResult<Vec<String>>;

    /// Remove and return up to `count` arbitrary members of `set`.
    async fn spop(&self, set: &str, count: usize) -> StateResult<Vec<String>>;

    /// Dispatch a buffered batch in one round-trip.
    async fn exec(&self, pipeline: Pipeline) -> StateResult<()>;

    async fn ping(&self) -> StateResult<()>;
}
