//! Mirroring local edits into the remote record store.
//!
//! Local state is authoritative for the session. Every mutation is turned into
//! per-index pending writes which coalesce (last write wins) until the next
//! flush. Failed writes are never rolled back locally; they stay queued and are
//! retried by the next flush or reconcile pass.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::{debug, info, instrument, warn};

use crate::error::StoreError;
use crate::{PageRecord, RecordStore};

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initial_backoff_ms")]
    pub initial_backoff: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_backoff_ms")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1600),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps. Tests and one-shot CLI commands use it.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        if self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let base = self.initial_backoff.saturating_mul(factor).min(self.max_backoff);
        let jitter_ceiling = (base.as_millis() as u64 / 4).max(1);
        let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling);
        base + Duration::from_millis(jitter)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempts < self.max_attempts.max(1) => {
                    let delay = self.delay_for(attempts);
                    debug!(%err, attempts, ?delay, what, "retrying store call");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Upsert(PageRecord),
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedWrite {
    op: WriteOp,
    failures: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: Vec<usize>,
    pub failed: Vec<usize>,
}

impl DeleteReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub upserted: Vec<usize>,
    pub deleted: Vec<usize>,
    pub failed: Vec<usize>,
}

impl SyncReport {
    pub fn written(&self) -> usize {
        self.upserted.len() + self.deleted.len()
    }
}

/// Pending remote writes, at most one per page index.
#[derive(Debug, Clone, Default)]
pub struct SyncQueue {
    pending: BTreeMap<usize, QueuedWrite>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn get(&self, page_index: usize) -> Option<&WriteOp> {
        self.pending.get(&page_index).map(|queued| &queued.op)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn enqueue(&mut self, page_index: usize, op: WriteOp) {
        self.pending
            .insert(page_index, QueuedWrite { op, failures: 0 });
    }

    /// Queues the writes that turn the remote view `before` into `after`.
    pub fn enqueue_diff(
        &mut self,
        before: &BTreeMap<usize, PageRecord>,
        after: &BTreeMap<usize, PageRecord>,
    ) -> usize {
        let mut queued = 0;
        for (index, record) in after {
            if before.get(index) != Some(record) {
                self.enqueue(*index, WriteOp::Upsert(record.clone()));
                queued += 1;
            }
        }
        for index in before.keys() {
            if !after.contains_key(index) {
                self.enqueue(*index, WriteOp::Delete);
                queued += 1;
            }
        }
        queued
    }

    /// Sends every pending write. Deletes go out as one batch, upserts one by one.
    #[instrument(skip_all)]
    pub async fn flush(&mut self, store: &dyn RecordStore, policy: &RetryPolicy) -> SyncReport {
        let mut report = SyncReport::default();
        if self.pending.is_empty() {
            return report;
        }

        let deletes: Vec<usize> = self
            .pending
            .iter()
            .filter(|(_, queued)| queued.op == WriteOp::Delete)
            .map(|(index, _)| *index)
            .collect();
        if !deletes.is_empty() {
            let outcome = delete_with_fallback(store, &deletes, policy).await;
            for index in &outcome.deleted {
                self.pending.remove(index);
            }
            for index in &outcome.failed {
                self.note_failure(*index);
            }
            report.deleted = outcome.deleted;
            report.failed.extend(outcome.failed);
        }

        let upserts: Vec<(usize, PageRecord)> = self
            .pending
            .iter()
            .filter_map(|(index, queued)| match &queued.op {
                WriteOp::Upsert(record) => Some((*index, record.clone())),
                WriteOp::Delete => None,
            })
            .collect();
        for (index, record) in upserts {
            match policy.run("upsert", || store.upsert(&record)).await {
                Ok(()) => {
                    self.pending.remove(&index);
                    report.upserted.push(index);
                }
                Err(err) => {
                    warn!(%err, page_index = index, "failed to save page record");
                    self.note_failure(index);
                    report.failed.push(index);
                }
            }
        }

        report.failed.sort_unstable();
        debug!(
            upserted = report.upserted.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "flushed sync queue"
        );
        report
    }

    fn note_failure(&mut self, page_index: usize) {
        if let Some(queued) = self.pending.get_mut(&page_index) {
            queued.failures = queued.failures.saturating_add(1);
        }
    }

    /// Number of flushes that failed to deliver the write queued for `page_index`.
    pub fn failures(&self, page_index: usize) -> u32 {
        self.pending
            .get(&page_index)
            .map(|queued| queued.failures)
            .unwrap_or(0)
    }
}

/// Deletes `page_indexes` through the batched route, falling back to one call
/// per index when the backend has no batched route.
pub async fn delete_with_fallback(
    store: &dyn RecordStore,
    page_indexes: &[usize],
    policy: &RetryPolicy,
) -> DeleteReport {
    let mut report = DeleteReport::default();
    if page_indexes.is_empty() {
        return report;
    }

    match policy
        .run("bulk delete", || store.delete_many(page_indexes))
        .await
    {
        Ok(()) => {
            report.deleted = page_indexes.to_vec();
            return report;
        }
        Err(StoreError::EndpointMissing(route)) => {
            debug!(%route, count = page_indexes.len(), "bulk delete unavailable, deleting individually");
        }
        Err(err) => {
            warn!(%err, "bulk delete failed, deleting individually");
        }
    }

    for index in page_indexes {
        match policy.run("delete", || store.delete(*index)).await {
            Ok(()) => report.deleted.push(*index),
            Err(err) => {
                warn!(%err, page_index = *index, "failed to delete page record");
                report.failed.push(*index);
            }
        }
    }
    report
}

/// Deletes remote records whose index has no local image.
#[instrument(skip(store, local, policy))]
pub async fn reconcile_orphans(
    store: &dyn RecordStore,
    local: &BTreeMap<usize, PageRecord>,
    policy: &RetryPolicy,
) -> Result<DeleteReport, StoreError> {
    let remote = policy.run("list", || store.list()).await?;
    let orphans: Vec<usize> = remote
        .iter()
        .map(|record| record.page_index)
        .filter(|index| !local.contains_key(index))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if orphans.is_empty() {
        return Ok(DeleteReport::default());
    }
    info!(count = orphans.len(), "removing orphaned page records");
    Ok(delete_with_fallback(store, &orphans, policy).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryRecordStore, StoreCall};
    use async_trait::async_trait;

    /// A backend with neither delete route.
    struct NoDeleteRoutes;

    #[async_trait]
    impl RecordStore for NoDeleteRoutes {
        async fn list(&self) -> Result<Vec<PageRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn upsert(&self, _record: &PageRecord) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete(&self, _page_index: usize) -> Result<(), StoreError> {
            Err(StoreError::NotFound)
        }

        async fn delete_many(&self, _page_indexes: &[usize]) -> Result<(), StoreError> {
            Err(StoreError::EndpointMissing("/api/images/bulk".into()))
        }
    }

    fn record(index: usize, url: &str) -> PageRecord {
        PageRecord {
            page_index: index,
            url: url.to_string(),
            page_name: None,
        }
    }

    fn map(records: &[PageRecord]) -> BTreeMap<usize, PageRecord> {
        records
            .iter()
            .map(|r| (r.page_index, r.clone()))
            .collect()
    }

    #[test]
    fn diff_queues_changed_and_removed_indices() {
        let before = map(&[record(1, "a"), record(2, "b"), record(3, "c")]);
        let after = map(&[record(1, "a"), record(2, "B"), record(4, "d")]);

        let mut queue = SyncQueue::new();
        assert_eq!(queue.enqueue_diff(&before, &after), 3);
        assert_eq!(queue.get(1), None);
        assert_eq!(queue.get(2), Some(&WriteOp::Upsert(record(2, "B"))));
        assert_eq!(queue.get(3), Some(&WriteOp::Delete));
        assert_eq!(queue.get(4), Some(&WriteOp::Upsert(record(4, "d"))));
    }

    #[test]
    fn later_writes_replace_earlier_ones() {
        let mut queue = SyncQueue::new();
        queue.enqueue(2, WriteOp::Upsert(record(2, "a")));
        queue.enqueue(2, WriteOp::Delete);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get(2), Some(&WriteOp::Delete));
    }

    #[tokio::test]
    async fn bulk_delete_falls_back_to_individual_calls() {
        let store = MemoryRecordStore::without_bulk_delete();
        store.seed([record(2, "a"), record(5, "b"), record(7, "c")]);
        store.fail_index(5);

        let report = delete_with_fallback(&store, &[2, 5], &RetryPolicy::immediate(3)).await;

        assert_eq!(report.deleted, vec![2]);
        assert_eq!(report.failed, vec![5]);
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::DeleteMany(vec![2, 5]),
                StoreCall::Delete(2),
                StoreCall::Delete(5),
            ]
        );
        assert_eq!(store.snapshot().keys().copied().collect::<Vec<_>>(), vec![5, 7]);
    }

    #[tokio::test]
    async fn not_found_deletes_count_as_failures() {
        let report =
            delete_with_fallback(&NoDeleteRoutes, &[2, 5], &RetryPolicy::immediate(3)).await;
        assert!(report.deleted.is_empty());
        assert_eq!(report.failed, vec![2, 5]);

        let mut queue = SyncQueue::new();
        queue.enqueue(2, WriteOp::Delete);
        let report = queue.flush(&NoDeleteRoutes, &RetryPolicy::immediate(1)).await;
        assert_eq!(report.failed, vec![2]);
        assert_eq!(queue.get(2), Some(&WriteOp::Delete));
    }

    #[tokio::test]
    async fn bulk_delete_uses_single_call_when_available() {
        let store = MemoryRecordStore::with_records([record(2, "a"), record(5, "b")]);
        let report = delete_with_fallback(&store, &[2, 5], &RetryPolicy::immediate(3)).await;
        assert!(report.is_clean());
        assert_eq!(store.calls(), vec![StoreCall::DeleteMany(vec![2, 5])]);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn transport_errors_are_retried_until_budget_is_spent() {
        let store = MemoryRecordStore::new();
        store.set_offline(true);
        let policy = RetryPolicy::immediate(3);

        let rec = record(1, "a");
        let err = policy
            .run("upsert", || store.upsert(&rec))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
        assert_eq!(store.calls().len(), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let store = MemoryRecordStore::new();
        store.fail_index(1);
        let policy = RetryPolicy::immediate(5);

        let rec = record(1, "a");
        let err = policy
            .run("upsert", || store.upsert(&rec))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Status { status: 400 });
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_writes_stay_queued_for_the_next_flush() {
        let store = MemoryRecordStore::with_records([record(3, "old")]);
        store.fail_index(1);
        let policy = RetryPolicy::immediate(2);

        let mut queue = SyncQueue::new();
        queue.enqueue(1, WriteOp::Upsert(record(1, "a")));
        queue.enqueue(2, WriteOp::Upsert(record(2, "b")));
        queue.enqueue(3, WriteOp::Delete);

        let report = queue.flush(&store, &policy).await;
        assert_eq!(report.upserted, vec![2]);
        assert_eq!(report.deleted, vec![3]);
        assert_eq!(report.failed, vec![1]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.failures(1), 1);

        store.heal_index(1);
        let report = queue.flush(&store, &policy).await;
        assert_eq!(report.upserted, vec![1]);
        assert!(queue.is_empty());
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn orphans_are_remote_records_without_local_images() {
        let store = MemoryRecordStore::with_records([
            record(0, "cover"),
            record(4, "gone"),
            record(9, "stale"),
        ]);
        let local = map(&[record(0, "cover"), record(1, "new")]);

        let report = reconcile_orphans(&store, &local, &RetryPolicy::immediate(1))
            .await
            .unwrap();
        assert_eq!(report.deleted, vec![4, 9]);
        assert_eq!(store.snapshot().keys().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        let first = policy.delay_for(1);
        let late = policy.delay_for(10);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        assert!(late >= Duration::from_millis(1600) && late <= Duration::from_millis(2000));
        assert_eq!(RetryPolicy::immediate(3).delay_for(4), Duration::ZERO);
    }
}
