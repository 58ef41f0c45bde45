//! A one-shot snapshot of the coordination store's four collection sizes.
//!
//! Grounded on the original `Monitor.py`, which printed the same four
//! counts under numbered Chinese labels for a human watching the crawl.

use std::sync::Arc;

use crate::store::CoordinationStore;
use crate::Result;

/// The four collection sizes `Monitor.py` reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub credentials_remaining: u64,
    pub tasks_queued: u64,
    pub results_queued: u64,
    pub visited: u64,
}

/// Read all four counts from `store`.
pub async fn snapshot(store: &Arc<dyn CoordinationStore>) -> Result<Snapshot> {
    Ok(Snapshot {
        credentials_remaining: store.credential_count().await?,
        tasks_queued: store.task_count().await?,
        results_queued: store.result_count().await?,
        visited: store.visited_count().await?,
    })
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "1. 剩余AK: {}", self.credentials_remaining)?;
        writeln!(f, "2. 任务队列: {}", self.tasks_queued)?;
        writeln!(f, "3. 存储队列: {}", self.results_queued)?;
        write!(f, "4. 已访问集合: {}", self.visited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeStore;

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
            Ok(3)
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
            Ok(5)
        }
        async fn is_visited(&self, _uid: &str) -> Result<bool> {
            Ok(false)
        }
        async fn mark_visited(&self, _uid: &str) -> Result<bool> {
            Ok(true)
        }
        async fn visited_count(&self) -> Result<u64> {
            Ok(7)
        }
        async fn replace_visited(&self, _uids: &[String]) -> Result<()> {
            Ok(())
        }
        async fn push_result(&self, _record: &str) -> Result<()> {
            Ok(())
        }
        async fn pop_result(&self) -> Result<Option<String>> {
            Ok(None)
        }
        async fn result_count(&self) -> Result<u64> {
            Ok(11)
        }
    }

    #[tokio::test]
    async fn snapshot_reads_all_four_counts() {
        let store: Arc<dyn CoordinationStore> = Arc::new(FakeStore);
        let snap = snapshot(&store).await.unwrap();
        assert_eq!(
            snap,
            Snapshot {
                credentials_remaining: 3,
                tasks_queued: 5,
                results_queued: 11,
                visited: 7,
            }
        );
    }

    #[test]
    fn display_matches_the_numbered_chinese_labels() {
        let snap = Snapshot {
            credentials_remaining: 1,
            tasks_queued: 2,
            results_queued: 3,
            visited: 4,
        };
        let text = snap.to_string();
        assert!(text.contains("1. 剩余AK: 1"));
        assert!(text.contains("4. 已访问集合: 4"));
    }
}
