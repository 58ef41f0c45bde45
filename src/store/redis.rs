//! A Redis-backed `CoordinationStore`.

use anyhow::Context;
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use tracing::instrument;

use crate::config::RedisConfig;
use crate::Result;

use super::{CoordinationStore, CoordinationStoreNew};

/// A Redis-backed coordination store.
pub struct Redis {
    pool: Pool<RedisConnectionManager>,
    ak_db: String,
    task_db: String,
    result_db: String,
    visit_db: String,
}

impl Redis {
    async fn conn(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        self.pool.get().await.context("could not get Redis connection")
    }
}

#[async_trait]
impl CoordinationStoreNew for Redis {
    #[instrument(name = "Redis::new", level = "trace", skip_all)]
    async fn new(config: &RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url())
            .context("could not create Redis connection manager")?;
        let pool = Pool::builder()
            .build(manager)
            .await
            .context("could not create Redis connection pool")?;
        Ok(Redis {
            pool,
            ak_db: config.ak_db.clone(),
            task_db: config.task_db.clone(),
            result_db: config.result_db.clone(),
            visit_db: config.visit_db.clone(),
        })
    }
}

#[async_trait]
impl CoordinationStore for Redis {
    #[instrument(level = "trace", skip_all)]
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("coordination store did not respond to PING")?;
        Ok(())
    }

    #[instrument(level = "trace", skip_all)]
    async fn sample_credential(&self) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn
            .srandmember(&self.ak_db)
            .await
            .context("could not sample a credential")?;
        Ok(value)
    }

    #[instrument(level = "trace", skip_all)]
    async fn remove_credential(&self, credential: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .srem(&self.ak_db, credential)
            .await
            .context("could not remove credential")?;
        Ok(())
    }

    #[instrument(level = "trace", skip_all)]
    async fn credential_count(&self) -> Result<u64> {
        let mut conn = self.conn().await?;
        conn.scard(&self.ak_db)
            .await
            .context("could not count credentials")
    }

    #[instrument(level = "trace", skip_all)]
    async fn reset_credentials(&self, credentials: &[String]) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("DEL")
            .arg(&self.ak_db)
            .query_async(&mut *conn)
            .await
            .context("could not clear credential set")?;
        if !credentials.is_empty() {
            let _: i64 = conn
                .sadd(&self.ak_db, credentials)
                .await
                .context("could not repopulate credential set")?;
        }
        Ok(())
    }

    #[instrument(level = "trace", skip_all)]
    async fn list_credentials(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.smembers(&self.ak_db)
            .await
            .context("could not list credentials")
    }

    #[instrument(level = "trace", skip_all)]
    async fn push_task(&self, task: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .rpush(&self.task_db, task)
            .await
            .context("could not push task")?;
        Ok(())
    }

    #[instrument(level = "trace", skip_all)]
    async fn pop_task(&self) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        conn.lpop(&self.task_db, None)
            .await
            .context("could not pop task")
    }

    #[instrument(level = "trace", skip_all)]
    async fn requeue_task_head(&self, task: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .lpush(&self.task_db, task)
            .await
            .context("could not requeue task")?;
        Ok(())
    }

    #[instrument(level = "trace", skip_all)]
    async fn task_count(&self) -> Result<u64> {
        let mut conn = self.conn().await?;
        conn.llen(&self.task_db)
            .await
            .context("could not count tasks")
    }

    #[instrument(level = "trace", skip_all)]
    async fn is_visited(&self, uid: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        conn.sismember(&self.visit_db, uid)
            .await
            .context("could not check visited set")
    }

    #[instrument(level = "trace", skip_all)]
    async fn mark_visited(&self, uid: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let added: i64 = conn
            .sadd(&self.visit_db, uid)
            .await
            .context("could not mark visited")?;
        Ok(added == 1)
    }

    #[instrument(level = "trace", skip_all)]
    async fn visited_count(&self) -> Result<u64> {
        let mut conn = self.conn().await?;
        conn.scard(&self.visit_db)
            .await
            .context("could not count visited set")
    }

    #[instrument(level = "trace", skip_all)]
    async fn replace_visited(&self, uids: &[String]) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("DEL")
            .arg(&self.visit_db)
            .query_async(&mut *conn)
            .await
            .context("could not clear visited set")?;
        for chunk in uids.chunks(10_000) {
            if chunk.is_empty() {
                continue;
            }
            let _: i64 = conn
                .sadd(&self.visit_db, chunk)
                .await
                .context("could not repopulate visited set")?;
        }
        Ok(())
    }

    #[instrument(level = "trace", skip_all)]
    async fn push_result(&self, record: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .rpush(&self.result_db, record)
            .await
            .context("could not push result")?;
        Ok(())
    }

    #[instrument(level = "trace", skip_all)]
    async fn pop_result(&self) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        conn.lpop(&self.result_db, None)
            .await
            .context("could not pop result")
    }

    #[instrument(level = "trace", skip_all)]
    async fn result_count(&self) -> Result<u64> {
        let mut conn = self.conn().await?;
        conn.llen(&self.result_db)
            .await
            .context("could not count results")
    }
}
