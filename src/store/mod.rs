//! Document store abstraction.
//!
//! The application never talks to a concrete database directly. Everything
//! goes through [`DocumentStore`]: schemaless documents grouped into
//! collections, point reads, filtered/ordered queries and single-document
//! writes. Two conditional operations (`insert_unique` and `delete_batch`)
//! carry default implementations for stores without transactions and are
//! overridden by stores that can make them atomic.

mod memory;
mod sqlite;

use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use self::memory::{MemoryDocumentStore, StoreOp};
pub use self::sqlite::SqliteDocumentStore;

pub type Fields = serde_json::Map<String, Value>;

/// Placeholder value replaced with the store's clock when a document is written.
pub const SERVER_TIMESTAMP: &str = "$serverTimestamp";

pub fn server_timestamp() -> Value {
    Value::String(SERVER_TIMESTAMP.to_string())
}

/// Object fields of a JSON value; anything else yields no fields.
pub fn to_fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Posts,
    /// `posts/{post_id}/comments`
    Comments(String),
    Likes,
}

impl Collection {
    pub fn path(&self) -> String {
        match self {
            Collection::Users => "users".to_string(),
            Collection::Posts => "posts".to_string(),
            Collection::Comments(post_id) => format!("posts/{}/comments", post_id),
            Collection::Likes => "likes".to_string(),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Deserialize the document into a model, exposing the document id as `id`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields)).map_err(|e| {
            StoreError::Backend(format!("malformed document {}: {}", self.id, e))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let actual = doc.fields.get(&self.field).unwrap_or(&Value::Null);
        actual == &self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: Collection,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(field, value))
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub collection: Collection,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(collection: &Collection, id: &str) -> Self {
        StoreError::NotFound {
            collection: collection.path(),
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(String),
    /// A document matching the key already existed; nothing was written.
    Existing(String),
}

impl InsertOutcome {
    pub fn id(&self) -> &str {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Existing(id) => id,
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub deleted: Vec<DocRef>,
    pub failed: Vec<(DocRef, StoreError)>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failure_for(&self, target: &DocRef) -> Option<&StoreError> {
        self.failed
            .iter()
            .find(|(doc, _)| doc == target)
            .map(|(_, err)| err)
    }

    /// Every ref failed with the same error; used when a transaction rolls back.
    pub fn all_failed(refs: &[DocRef], err: StoreError) -> Self {
        Self {
            deleted: Vec::new(),
            failed: refs.iter().map(|r| (r.clone(), err.clone())).collect(),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    async fn get(&self, collection: &Collection, id: &str) -> Result<Document, StoreError>;

    /// Insert a document under a store-assigned id.
    async fn insert(&self, collection: &Collection, fields: Fields) -> Result<String, StoreError>;

    /// Write a document under a caller-chosen id. With `merge`, fields not
    /// named in `fields` are kept.
    async fn set(
        &self,
        collection: &Collection,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<(), StoreError>;

    /// Partial update of an existing document.
    async fn update(
        &self,
        collection: &Collection,
        id: &str,
        partial: Fields,
    ) -> Result<(), StoreError>;

    /// Deleting a missing document succeeds.
    async fn delete(&self, collection: &Collection, id: &str) -> Result<(), StoreError>;

    /// Insert unless a document matching every `key` filter exists.
    ///
    /// The default is read-then-write and can race; stores that support a
    /// conditional write override it.
    async fn insert_unique(
        &self,
        collection: &Collection,
        key: &[Filter],
        fields: Fields,
    ) -> Result<InsertOutcome, StoreError> {
        let mut query = Query::new(collection.clone()).limit(1);
        query.filters = key.to_vec();
        if let Some(existing) = self.query(&query).await?.into_iter().next() {
            return Ok(InsertOutcome::Existing(existing.id));
        }
        let id = self.insert(collection, fields).await?;
        Ok(InsertOutcome::Inserted(id))
    }

    /// Delete many documents.
    ///
    /// The default attempts every delete independently and collects the
    /// failures. Dependents go first; posts are deleted only once those have
    /// all settled. Transactional stores override it to be all-or-nothing.
    async fn delete_batch(&self, refs: &[DocRef]) -> BatchOutcome {
        let (posts, dependents): (Vec<&DocRef>, Vec<&DocRef>) = refs
            .iter()
            .partition(|r| matches!(r.collection, Collection::Posts));

        let mut results = futures::future::join_all(
            dependents
                .into_iter()
                .map(|r| async move { (r.clone(), self.delete(&r.collection, &r.id).await) }),
        )
        .await;
        for r in posts {
            results.push((r.clone(), self.delete(&r.collection, &r.id).await));
        }

        let mut outcome = BatchOutcome::default();
        for (doc, result) in results {
            match result {
                Ok(()) => outcome.deleted.push(doc),
                Err(err) => outcome.failed.push((doc, err)),
            }
        }
        outcome
    }
}

/// Run a store call with an overall deadline. A timeout is reported as
/// [`StoreError::Unavailable`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Unavailable(format!(
            "no response within {} ms",
            limit.as_millis()
        ))),
    }
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Replace every top-level [`SERVER_TIMESTAMP`] placeholder with the current time.
pub(crate) fn resolve_server_timestamps(fields: &mut Fields) {
    let mut now: Option<String> = None;
    for value in fields.values_mut() {
        if value.as_str() == Some(SERVER_TIMESTAMP) {
            let ts = now.get_or_insert_with(now_timestamp).clone();
            *value = Value::String(ts);
        }
    }
}

pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        // Missing fields sort first, like an unset timestamp.
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

pub(crate) fn is_valid_field_name(field: &str) -> bool {
    !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
