//! The persistence worker: drains the result queue into the downstream
//! Poi table.
//!
//! Ground truth is the original `Persist.py`: pop one record, `DELETE`
//! then `INSERT` it (two separate statements — intentionally not a single
//! transactional upsert, see the design notes), and reconnect after being
//! idle for a while. The original's failure handler pushed the failed
//! record onto a queue named after the destination *table*, not the
//! result queue — clearly a bug, since nothing ever drains that queue. We
//! push failures back onto the result queue's tail instead, so they are
//! retried.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{instrument, warn};

use crate::config::DatabaseConfig;
use crate::poi::PoiRecord;
use crate::store::CoordinationStore;
use crate::Result;

/// How long to idle before closing and reopening the downstream
/// connection. Matches the original's forced reconnect cadence: long-idle
/// connections in the upstream deployment's Postgres go stale, so the
/// worker closes and reopens rather than trusting them to still be good.
const IDLE_RECONNECT: Duration = Duration::from_secs(300);

/// A store for upserting a [`PoiRecord`] by its `uid`.
#[async_trait]
pub trait PoiStore: Send + Sync {
    async fn upsert(&self, record: &PoiRecord) -> Result<()>;

    /// Close the current connection and open a fresh one.
    async fn reconnect(&mut self) -> Result<()>;
}

/// A Postgres-backed [`PoiStore`].
pub struct PgPoiStore {
    config: DatabaseConfig,
    pool: PgPool,
}

impl PgPoiStore {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = Self::connect(config).await?;
        Ok(PgPoiStore {
            config: config.clone(),
            pool,
        })
    }

    async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
        PgPool::connect(&config.url())
            .await
            .context("could not connect to the Poi database")
    }
}

#[async_trait]
impl PoiStore for PgPoiStore {
    #[instrument(level = "debug", skip(self, record), fields(uid = %record.uid))]
    async fn upsert(&self, record: &PoiRecord) -> Result<()> {
        // Non-atomic by design: a crash between these two statements can
        // lose a record, matching the original's `delete_and_insert`. This
        // crate does not silently "fix" that into a transactional upsert.
        sqlx::query(&format!("DELETE FROM {} WHERE uid = $1", self.config.table))
            .bind(&record.uid)
            .execute(&self.pool)
            .await
            .context("could not delete existing Poi row")?;

        sqlx::query(&format!(
            "INSERT INTO {} \
             (uid, poi, name, geohash, province, area, district, tag, telephone, aoi, attribute) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            self.config.table
        ))
        .bind(&record.uid)
        .bind(&record.poi)
        .bind(&record.name)
        .bind(&record.geohash)
        .bind(&record.province)
        .bind(&record.area)
        .bind(&record.district)
        .bind(&record.tag)
        .bind(&record.telephone)
        .bind(&record.aoi)
        .bind(&record.attribute)
        .execute(&self.pool)
        .await
        .context("could not insert Poi row")?;

        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn reconnect(&mut self) -> Result<()> {
        self.pool.close().await;
        self.pool = Self::connect(&self.config).await?;
        Ok(())
    }
}

/// Drains the result queue into a [`PoiStore`].
pub struct PersistenceWorker<S: PoiStore> {
    coordination: std::sync::Arc<dyn CoordinationStore>,
    store: S,
}

impl<S: PoiStore> PersistenceWorker<S> {
    pub fn new(coordination: std::sync::Arc<dyn CoordinationStore>, store: S) -> Self {
        PersistenceWorker { coordination, store }
    }

    /// Run forever, draining one record at a time. When the result queue
    /// is empty, closes the downstream connection, sleeps, and reopens a
    /// fresh one before continuing — long-idle connections go stale.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            if !self.drain_one().await? {
                tokio::time::sleep(IDLE_RECONNECT).await;
                if let Err(err) = self.store.reconnect().await {
                    warn!(error = %err, "could not reopen downstream connection; retrying next idle cycle");
                }
            }
        }
    }

    /// Pop and persist a single record. Returns `false` if the queue was
    /// empty.
    #[instrument(level = "debug", skip(self))]
    pub async fn drain_one(&mut self) -> Result<bool> {
        let Some(raw) = self.coordination.pop_result().await? else {
            return Ok(false);
        };

        match PoiRecord::from_wire(&raw) {
            Ok(record) => {
                if let Err(err) = self.store.upsert(&record).await {
                    warn!(error = %err, uid = %record.uid, "failed to persist record; requeuing");
                    self.coordination.push_result(&raw).await?;
                }
            }
            Err(err) => {
                warn!(error = %err, "dropping unparseable record from result queue");
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeStore(Mutex<VecDeque<String>>);

    #[async_trait]
    impl CoordinationStore for FakeStore {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn sample_credential(&self) -> Result<Option<String>> {
            Ok(None)
        }
        async fn remove_credential(&self, _credential: &str) -> Result<()> {
            Ok(())
        }
        async fn credential_count(&self) -> Result<u64> {
            Ok(0)
        }
        async fn reset_credentials(&self, _credentials: &[String]) -> Result<()> {
            Ok(())
        }
        async fn list_credentials(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn push_task(&self, _task: &str) -> Result<()> {
            Ok(())
        }
        async fn pop_task(&self) -> Result<Option<String>> {
            Ok(None)
        }
        async fn requeue_task_head(&self, _task: &str) -> Result<()> {
            Ok(())
        }
        async fn task_count(&self) -> Result<u64> {
            Ok(0)
        }
        async fn is_visited(&self, _uid: &str) -> Result<bool> {
            Ok(false)
        }
        async fn mark_visited(&self, _uid: &str) -> Result<bool> {
            Ok(true)
        }
        async fn visited_count(&self) -> Result<u64> {
            Ok(0)
        }
        async fn replace_visited(&self, _uids: &[String]) -> Result<()> {
            Ok(())
        }
        async fn push_result(&self, record: &str) -> Result<()> {
            self.0.lock().unwrap().push_back(record.to_owned());
            Ok(())
        }
        async fn pop_result(&self) -> Result<Option<String>> {
            Ok(self.0.lock().unwrap().pop_front())
        }
        async fn result_count(&self) -> Result<u64> {
            Ok(self.0.lock().unwrap().len() as u64)
        }
    }

    struct FailingStore(AtomicBool);

    #[async_trait]
    impl PoiStore for FailingStore {
        async fn upsert(&self, _record: &PoiRecord) -> Result<()> {
            if self.0.load(Ordering::SeqCst) {
                Err(anyhow::anyhow!("simulated database failure"))
            } else {
                Ok(())
            }
        }
        async fn reconnect(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn sample_record() -> PoiRecord {
        PoiRecord::new(
            "uid1".to_owned(),
            "Name".to_owned(),
            116.4,
            39.9,
            "美食".to_owned(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            None,
            None,
            &Default::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn failed_upsert_is_requeued_on_the_result_queue_not_a_table_named_queue() {
        let coordination = Arc::new(FakeStore::default());
        coordination.push_result(&sample_record().to_wire()).await.unwrap();
        let store = FailingStore(AtomicBool::new(true));
        let mut worker = PersistenceWorker::new(coordination.clone(), store);

        let drained = worker.drain_one().await.unwrap();
        assert!(drained);
        assert_eq!(coordination.result_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn successful_upsert_drains_the_queue() {
        let coordination = Arc::new(FakeStore::default());
        coordination.push_result(&sample_record().to_wire()).await.unwrap();
        let store = FailingStore(AtomicBool::new(false));
        let mut worker = PersistenceWorker::new(coordination.clone(), store);

        worker.drain_one().await.unwrap();
        assert_eq!(coordination.result_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn draining_an_empty_queue_reports_nothing_drained() {
        let coordination = Arc::new(FakeStore::default());
        let store = FailingStore(AtomicBool::new(false));
        let mut worker = PersistenceWorker::new(coordination, store);
        assert!(!worker.drain_one().await.unwrap());
    }
}
