//! Vector store contract and the in-memory backend used for tests and local runs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use recall_access::Namespace;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::embedding::cosine_similarity;
use crate::error::{StoreError, StoreResult};

const DEFAULT_LIST_PAGE_SIZE: usize = 100;

/// Scalar or string-list metadata value accepted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

/// Flat metadata map stored next to each vector.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// One `(id, vector, metadata)` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVector {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// Query hit with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredVector {
    pub record: StoredVector,
    pub score: f32,
}

/// One page of a namespace listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub records: Vec<StoredVector>,
    pub next_page_token: Option<String>,
}

/// Async contract for a namespaced vector store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, namespace: Namespace, records: Vec<StoredVector>) -> StoreResult<()>;
    /// Absent ids are omitted from the result.
    async fn fetch(
        &self,
        ids: &[String],
        namespace: Namespace,
    ) -> StoreResult<HashMap<String, StoredVector>>;
    async fn delete(&self, ids: &[String], namespace: Namespace) -> StoreResult<()>;
    async fn list_paginated(
        &self,
        namespace: Namespace,
        page_token: Option<&str>,
    ) -> StoreResult<ListPage>;
    /// Returns up to `top_k` rows ordered by descending similarity.
    async fn query(
        &self,
        namespace: Namespace,
        vector: &[f32],
        top_k: usize,
    ) -> StoreResult<Vec<ScoredVector>>;
}

/// When accepted writes become visible to reads in [`InMemoryVectorStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteVisibility {
    #[default]
    Immediate,
    /// Visible after this many subsequent read calls.
    AfterReads(usize),
    /// Accepted but never visible.
    Never,
}

#[derive(Debug, Clone)]
enum PendingOp {
    Upsert(StoredVector),
    Delete(String),
}

#[derive(Debug, Clone)]
struct PendingWrite {
    namespace: Namespace,
    op: PendingOp,
    remaining_reads: Option<usize>,
}

#[derive(Debug, Default)]
struct StoreInner {
    namespaces: HashMap<Namespace, BTreeMap<String, StoredVector>>,
    pending: Vec<PendingWrite>,
}

impl StoreInner {
    fn apply(&mut self, namespace: Namespace, op: PendingOp) {
        let rows = self.namespaces.entry(namespace).or_default();
        match op {
            PendingOp::Upsert(record) => {
                rows.insert(record.id.clone(), record);
            }
            PendingOp::Delete(id) => {
                rows.remove(&id);
            }
        }
    }

    fn tick_reads(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for mut write in pending {
            match write.remaining_reads.as_mut() {
                Some(remaining) if *remaining <= 1 => self.apply(write.namespace, write.op),
                Some(remaining) => {
                    *remaining -= 1;
                    self.pending.push(write);
                }
                None => self.pending.push(write),
            }
        }
    }
}

/// In-memory implementation for tests and local experimentation.
///
/// Counts every trait call so tests can assert that rejected requests never
/// reached the store, and can delay or drop write visibility to exercise the
/// verification loop.
#[derive(Debug)]
pub struct InMemoryVectorStore {
    inner: RwLock<StoreInner>,
    page_size: usize,
    visibility: Mutex<WriteVisibility>,
    failing_upsert_ids: Mutex<BTreeSet<String>>,
    unavailable: Mutex<Option<String>>,
    upsert_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    list_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_LIST_PAGE_SIZE)
    }
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            page_size: page_size.max(1),
            visibility: Mutex::new(WriteVisibility::Immediate),
            failing_upsert_ids: Mutex::new(BTreeSet::new()),
            unavailable: Mutex::new(None),
            upsert_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_write_visibility(&self, visibility: WriteVisibility) {
        if let Ok(mut current) = self.visibility.lock() {
            *current = visibility;
        }
    }

    /// Makes every upsert batch containing `id` fail with `Unavailable`.
    pub fn fail_upserts_for(&self, id: &str) {
        if let Ok(mut ids) = self.failing_upsert_ids.lock() {
            ids.insert(id.to_string());
        }
    }

    /// Makes every call fail with `Unavailable(reason)` until cleared with `None`.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        if let Ok(mut current) = self.unavailable.lock() {
            *current = reason.map(str::to_string);
        }
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Upsert plus delete calls.
    pub fn mutation_calls(&self) -> usize {
        self.upsert_calls() + self.delete_calls()
    }

    /// Every trait call, reads included.
    pub fn total_calls(&self) -> usize {
        self.mutation_calls()
            + self.fetch_calls()
            + self.list_calls.load(Ordering::SeqCst)
            + self.query_calls.load(Ordering::SeqCst)
    }

    /// Writes a row directly, bypassing counters and visibility rules.
    pub async fn seed(&self, namespace: Namespace, record: StoredVector) {
        let mut inner = self.inner.write().await;
        inner.apply(namespace, PendingOp::Upsert(record));
    }

    /// Reads a row directly, bypassing counters and visibility rules.
    pub async fn peek(&self, namespace: Namespace, id: &str) -> Option<StoredVector> {
        let inner = self.inner.read().await;
        inner
            .namespaces
            .get(&namespace)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    pub async fn len(&self, namespace: Namespace) -> usize {
        let inner = self.inner.read().await;
        inner.namespaces.get(&namespace).map(BTreeMap::len).unwrap_or(0)
    }

    pub async fn is_empty(&self, namespace: Namespace) -> bool {
        self.len(namespace).await == 0
    }

    fn ensure_available(&self) -> StoreResult<()> {
        match self.unavailable.lock().ok().and_then(|reason| reason.clone()) {
            Some(reason) => Err(StoreError::Unavailable(reason)),
            None => Ok(()),
        }
    }

    fn current_visibility(&self) -> WriteVisibility {
        self.visibility
            .lock()
            .map(|visibility| *visibility)
            .unwrap_or_default()
    }

    async fn accept_write(&self, namespace: Namespace, op: PendingOp) {
        let visibility = self.current_visibility();
        let mut inner = self.inner.write().await;
        match visibility {
            WriteVisibility::Immediate | WriteVisibility::AfterReads(0) => {
                inner.apply(namespace, op)
            }
            WriteVisibility::AfterReads(reads) => inner.pending.push(PendingWrite {
                namespace,
                op,
                remaining_reads: Some(reads),
            }),
            WriteVisibility::Never => inner.pending.push(PendingWrite {
                namespace,
                op,
                remaining_reads: None,
            }),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, namespace: Namespace, records: Vec<StoredVector>) -> StoreResult<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        let failing = self
            .failing_upsert_ids
            .lock()
            .map(|ids| ids.clone())
            .unwrap_or_default();
        if let Some(record) = records.iter().find(|record| failing.contains(&record.id)) {
            return Err(StoreError::Unavailable(format!(
                "upsert of '{}' refused by injected failure",
                record.id
            )));
        }
        if let Some(record) = records.iter().find(|record| record.id.trim().is_empty()) {
            return Err(StoreError::Rejected(format!(
                "record id cannot be empty (metadata keys: {})",
                record.metadata.len()
            )));
        }
        for record in records {
            self.accept_write(namespace, PendingOp::Upsert(record)).await;
        }
        Ok(())
    }

    async fn fetch(
        &self,
        ids: &[String],
        namespace: Namespace,
    ) -> StoreResult<HashMap<String, StoredVector>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        let mut inner = self.inner.write().await;
        inner.tick_reads();
        let Some(rows) = inner.namespaces.get(&namespace) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|row| (id.clone(), row.clone())))
            .collect())
    }

    async fn delete(&self, ids: &[String], namespace: Namespace) -> StoreResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        for id in ids {
            self.accept_write(namespace, PendingOp::Delete(id.clone()))
                .await;
        }
        Ok(())
    }

    async fn list_paginated(
        &self,
        namespace: Namespace,
        page_token: Option<&str>,
    ) -> StoreResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        let mut inner = self.inner.write().await;
        inner.tick_reads();
        let Some(rows) = inner.namespaces.get(&namespace) else {
            return Ok(ListPage::default());
        };
        let start = page_token.map(str::trim).filter(|token| !token.is_empty());
        let mut records = rows
            .range::<str, _>((
                start.map_or(std::ops::Bound::Unbounded, std::ops::Bound::Excluded),
                std::ops::Bound::Unbounded,
            ))
            .take(self.page_size + 1)
            .map(|(_, row)| row.clone())
            .collect::<Vec<_>>();
        let next_page_token = if records.len() > self.page_size {
            records.truncate(self.page_size);
            records.last().map(|row| row.id.clone())
        } else {
            None
        };
        Ok(ListPage {
            records,
            next_page_token,
        })
    }

    async fn query(
        &self,
        namespace: Namespace,
        vector: &[f32],
        top_k: usize,
    ) -> StoreResult<Vec<ScoredVector>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.write().await;
        inner.tick_reads();
        let Some(rows) = inner.namespaces.get(&namespace) else {
            return Ok(Vec::new());
        };
        let mut matches = rows
            .values()
            .map(|row| ScoredVector {
                score: cosine_similarity(vector, &row.vector),
                record: row.clone(),
            })
            .collect::<Vec<_>>();
        matches.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.record.id.cmp(&right.record.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}
