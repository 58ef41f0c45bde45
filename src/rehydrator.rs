//! Rehydrates the coordination store's visited set from the Poi table.
//!
//! Grounded on the original `PushVisitStatus.py`: page through every `uid`
//! already persisted and wholesale-replace the visited set with them, so a
//! freshly started crawl (or one recovering from a flushed Redis instance)
//! does not re-fetch POIs it already stored.

use anyhow::Context;
use sqlx::PgPool;
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::store::CoordinationStore;
use crate::Result;

const PAGE_SIZE: i64 = 10_000;

/// Read every `uid` from the Poi table, paged, and replace the
/// coordination store's visited set with them.
#[instrument(level = "debug", skip(store))]
pub async fn rehydrate(config: &DatabaseConfig, store: &dyn CoordinationStore) -> Result<u64> {
    let pool = PgPool::connect(&config.url())
        .await
        .context("could not connect to the Poi database")?;

    let mut uids = Vec::new();
    let mut offset: i64 = 0;
    loop {
        let page: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT uid FROM {} ORDER BY uid LIMIT $1 OFFSET $2",
            config.table
        ))
        .bind(PAGE_SIZE)
        .bind(offset)
        .fetch_all(&pool)
        .await
        .context("could not page through the Poi table")?;
        if page.is_empty() {
            break;
        }
        offset += page.len() as i64;
        uids.extend(page.into_iter().map(|(uid,)| uid));
    }

    let count = uids.len() as u64;
    store.replace_visited(&uids).await?;
    info!(count, "rehydrated visited set from the Poi table");
    Ok(count)
}
