use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    compare_values, resolve_server_timestamps, BatchOutcome, Collection, Direction, DocRef,
    Document, DocumentStore, Fields, Filter, InsertOutcome, Query, StoreError,
};

/// Operation kinds, used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Query,
    Get,
    Insert,
    Set,
    Update,
    Delete,
}

#[derive(Default)]
struct Inner {
    /// Documents per collection path, in insertion order.
    collections: HashMap<String, Vec<Document>>,
    calls: usize,
    mutations: usize,
    fail_next: HashMap<StoreOp, StoreError>,
    failing_deletes: HashMap<String, StoreError>,
}

/// In-process document store.
///
/// Every call is applied under one lock, so `insert_unique` and
/// `delete_batch` are atomic here. Call counters and failure injection make
/// it the store of choice for engine tests.
#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
    latency: Mutex<Option<Duration>>,
    op_latency: Mutex<HashMap<StoreOp, Duration>>,
    batch_ack_delay: Mutex<Option<Duration>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of store calls made so far.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    /// Number of calls that wrote or deleted something.
    pub fn mutations(&self) -> usize {
        self.lock().mutations
    }

    pub fn count(&self, collection: &Collection) -> usize {
        self.lock()
            .collections
            .get(&collection.path())
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn documents(&self, collection: &Collection) -> Vec<Document> {
        self.lock()
            .collections
            .get(&collection.path())
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next call of the given kind.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.lock().fail_next.insert(op, err);
    }

    /// Fail every delete of the document with this id.
    pub fn fail_deletes_of(&self, id: &str, err: StoreError) {
        self.lock().failing_deletes.insert(id.to_string(), err);
    }

    /// Delay every call, for exercising timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    /// Delay only calls of one kind, overriding [`set_latency`](Self::set_latency).
    pub fn set_op_latency(&self, op: StoreOp, latency: Option<Duration>) {
        if let Ok(mut guard) = self.op_latency.lock() {
            match latency {
                Some(latency) => guard.insert(op, latency),
                None => guard.remove(&op),
            };
        }
    }

    /// Apply batch deletes at once but delay the reply, like a store whose
    /// acknowledgement arrives late.
    pub fn set_batch_ack_delay(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.batch_ack_delay.lock() {
            *guard = delay;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn begin(&self, op: StoreOp) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        let latency = self
            .op_latency
            .lock()
            .ok()
            .and_then(|l| l.get(&op).copied())
            .or_else(|| self.latency.lock().ok().and_then(|l| *l));
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut inner = self.lock();
        inner.calls += 1;
        if let Some(err) = inner.fail_next.remove(&op) {
            return Err(err);
        }
        Ok(inner)
    }
}

impl Inner {
    fn select(&self, query: &Query) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .collections
            .get(&query.collection.path())
            .map(|docs| {
                docs.iter()
                    .filter(|d| query.filters.iter().all(|f| f.matches(d)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            // Stable sort keeps insertion order for equal keys.
            docs.sort_by(|a, b| {
                let null = serde_json::Value::Null;
                let left = a.fields.get(&order.field).unwrap_or(&null);
                let right = b.fields.get(&order.field).unwrap_or(&null);
                let ord = compare_values(left, right);
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        docs
    }

    fn insert(&mut self, collection: &Collection, mut fields: Fields) -> String {
        resolve_server_timestamps(&mut fields);
        let id = uuid::Uuid::now_v7().to_string();
        self.collections
            .entry(collection.path())
            .or_default()
            .push(Document {
                id: id.clone(),
                fields,
            });
        self.mutations += 1;
        id
    }

    fn find_mut(&mut self, collection: &Collection, id: &str) -> Option<&mut Document> {
        self.collections
            .get_mut(&collection.path())
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
    }

    fn remove(&mut self, collection: &Collection, id: &str) -> Result<(), StoreError> {
        if let Some(err) = self.failing_deletes.get(id) {
            return Err(err.clone());
        }
        if let Some(docs) = self.collections.get_mut(&collection.path()) {
            docs.retain(|d| d.id != id);
        }
        self.mutations += 1;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let inner = self.begin(StoreOp::Query).await?;
        Ok(inner.select(query))
    }

    async fn get(&self, collection: &Collection, id: &str) -> Result<Document, StoreError> {
        let inner = self.begin(StoreOp::Get).await?;
        inner
            .collections
            .get(&collection.path())
            .and_then(|docs| docs.iter().find(|d| d.id == id))
            .cloned()
            .ok_or_else(|| StoreError::not_found(collection, id))
    }

    async fn insert(&self, collection: &Collection, fields: Fields) -> Result<String, StoreError> {
        let mut inner = self.begin(StoreOp::Insert).await?;
        Ok(inner.insert(collection, fields))
    }

    async fn set(
        &self,
        collection: &Collection,
        id: &str,
        mut fields: Fields,
        merge: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.begin(StoreOp::Set).await?;
        resolve_server_timestamps(&mut fields);
        inner.mutations += 1;
        if let Some(doc) = inner.find_mut(collection, id) {
            if merge {
                doc.fields.extend(fields);
            } else {
                doc.fields = fields;
            }
            return Ok(());
        }
        inner
            .collections
            .entry(collection.path())
            .or_default()
            .push(Document {
                id: id.to_string(),
                fields,
            });
        Ok(())
    }

    async fn update(
        &self,
        collection: &Collection,
        id: &str,
        mut partial: Fields,
    ) -> Result<(), StoreError> {
        let mut inner = self.begin(StoreOp::Update).await?;
        resolve_server_timestamps(&mut partial);
        let doc = inner
            .find_mut(collection, id)
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        doc.fields.extend(partial);
        inner.mutations += 1;
        Ok(())
    }

    async fn delete(&self, collection: &Collection, id: &str) -> Result<(), StoreError> {
        let mut inner = self.begin(StoreOp::Delete).await?;
        inner.remove(collection, id)
    }

    async fn insert_unique(
        &self,
        collection: &Collection,
        key: &[Filter],
        fields: Fields,
    ) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.begin(StoreOp::Insert).await?;
        let mut probe = Query::new(collection.clone()).limit(1);
        probe.filters = key.to_vec();
        if let Some(existing) = inner.select(&probe).into_iter().next() {
            return Ok(InsertOutcome::Existing(existing.id));
        }
        Ok(InsertOutcome::Inserted(inner.insert(collection, fields)))
    }

    async fn delete_batch(&self, refs: &[DocRef]) -> BatchOutcome {
        let outcome = {
            let mut inner = match self.begin(StoreOp::Delete).await {
                Ok(inner) => inner,
                Err(err) => return BatchOutcome::all_failed(refs, err),
            };

            // All-or-nothing: check every target before removing any.
            if let Some(err) = refs
                .iter()
                .find_map(|r| inner.failing_deletes.get(&r.id).cloned())
            {
                return BatchOutcome::all_failed(refs, err);
            }

            let mut outcome = BatchOutcome::default();
            for r in refs {
                if inner.remove(&r.collection, &r.id).is_ok() {
                    outcome.deleted.push(r.clone());
                }
            }
            outcome
        };

        let delay = self.batch_ack_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}
