//! The coordination store: the single source of shared state that lets many
//! crawler worker processes cooperate without talking to each other
//! directly.
//!
//! This generalizes the teacher's two-operation `KeyValueStore` cache
//! interface (pipelined `GET`/`SET`) into the five named collections this
//! crawler actually needs: a credential set, a task queue, a visited set,
//! and a result queue. Kept the teacher's split between an object-safe
//! trait and a `Sized`-bound constructor trait, for the same reason: `new`
//! can't be part of a trait we put in a `Box<dyn _>`.

use async_trait::async_trait;

use crate::config::RedisConfig;
use crate::Result;

pub mod redis;

/// Shared mutable state for a crawl, backed by a coordination store such as
/// Redis.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Fail fast at startup if the store is unreachable.
    async fn ping(&self) -> Result<()>;

    /// Draw one credential uniformly at random from the credential set,
    /// without removing it.
    async fn sample_credential(&self) -> Result<Option<String>>;
    /// Permanently remove an exhausted or rejected credential.
    async fn remove_credential(&self, credential: &str) -> Result<()>;
    /// Number of credentials remaining.
    async fn credential_count(&self) -> Result<u64>;
    /// Replace the whole credential set.
    async fn reset_credentials(&self, credentials: &[String]) -> Result<()>;
    /// List every remaining credential.
    async fn list_credentials(&self) -> Result<Vec<String>>;

    /// Enqueue a task at the tail of the task queue.
    async fn push_task(&self, task: &str) -> Result<()>;
    /// Pop the task at the head of the queue, if any.
    async fn pop_task(&self) -> Result<Option<String>>;
    /// Put a task back at the head of the queue, so it is retried next.
    async fn requeue_task_head(&self, task: &str) -> Result<()>;
    /// Number of tasks remaining in the queue.
    async fn task_count(&self) -> Result<u64>;

    /// Whether `uid` has already been recorded as visited.
    async fn is_visited(&self, uid: &str) -> Result<bool>;
    /// Atomically mark `uid` visited. Returns `true` iff it was newly
    /// added (ie, this caller "won" the race to be the first to see it).
    async fn mark_visited(&self, uid: &str) -> Result<bool>;
    /// Number of entries in the visited set.
    async fn visited_count(&self) -> Result<u64>;
    /// Wholesale replace the visited set's contents.
    async fn replace_visited(&self, uids: &[String]) -> Result<()>;

    /// Push a serialized record onto the tail of the result queue.
    async fn push_result(&self, record: &str) -> Result<()>;
    /// Pop the record at the head of the result queue, if any.
    async fn pop_result(&self) -> Result<Option<String>>;
    /// Number of records waiting in the result queue.
    async fn result_count(&self) -> Result<u64>;
}

/// Constructor for a [`CoordinationStore`], kept separate because static
/// methods can't appear on object-safe traits.
#[async_trait]
pub trait CoordinationStoreNew: CoordinationStore + Sized {
    async fn new(config: &RedisConfig) -> Result<Self>;
}
