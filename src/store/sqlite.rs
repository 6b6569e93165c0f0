use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use super::{
    is_valid_field_name, resolve_server_timestamps, BatchOutcome, Collection, Direction, DocRef,
    Document, DocumentStore, Fields, Filter, InsertOutcome, Query, StoreError,
};
use crate::state::DbPool;

/// Document store backed by the `documents` table: one JSON object per row,
/// keyed by `(collection, id)`. Conditional writes run inside an immediate
/// transaction, so `insert_unique` and `delete_batch` are atomic.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: DbPool,
}

impl SqliteDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("store task failed: {}", e)))?
    }
}

/// Raised when the future awaiting a blocking write is dropped, typically by a
/// caller's deadline. The write checks it just before committing.
struct AbandonOnDrop(Arc<AtomicBool>);

impl AbandonOnDrop {
    fn new() -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (Self(flag.clone()), flag)
    }
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn ensure_awaited(abandoned: &AtomicBool) -> Result<(), StoreError> {
    if abandoned.load(Ordering::SeqCst) {
        Err(StoreError::Unavailable("caller gave up before commit".into()))
    } else {
        Ok(())
    }
}

fn sql_err(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
            StoreError::Unavailable(err.to_string())
        }
        Some(rusqlite::ErrorCode::ReadOnly) => StoreError::PermissionDenied(err.to_string()),
        _ => StoreError::Backend(err.to_string()),
    }
}

fn checked_field(field: &str) -> Result<&str, StoreError> {
    if is_valid_field_name(field) {
        Ok(field)
    } else {
        Err(StoreError::Backend(format!("invalid field name: {:?}", field)))
    }
}

fn to_sql_value(value: &Value) -> Result<Option<SqlValue>, StoreError> {
    Ok(match value {
        Value::Null => None,
        Value::Bool(b) => Some(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(SqlValue::Integer(i)),
            None => Some(SqlValue::Real(n.as_f64().unwrap_or_default())),
        },
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        other => {
            return Err(StoreError::Backend(format!(
                "unsupported filter value: {}",
                other
            )))
        }
    })
}

fn parse_fields(id: &str, raw: &str) -> Result<Fields, StoreError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) | Err(_) => Err(StoreError::Backend(format!(
            "document {} is not a JSON object",
            id
        ))),
    }
}

fn select(conn: &Connection, query: &Query) -> Result<Vec<Document>, StoreError> {
    let mut sql = String::from("SELECT id, fields FROM documents WHERE collection = ?");
    let mut args: Vec<SqlValue> = vec![SqlValue::Text(query.collection.path())];

    for filter in &query.filters {
        let field = checked_field(&filter.field)?;
        match to_sql_value(&filter.value)? {
            Some(value) => {
                sql.push_str(&format!(" AND json_extract(fields, '$.{}') = ?", field));
                args.push(value);
            }
            None => sql.push_str(&format!(" AND json_extract(fields, '$.{}') IS NULL", field)),
        }
    }

    match &query.order_by {
        Some(order) => {
            let field = checked_field(&order.field)?;
            let dir = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            sql.push_str(&format!(
                " ORDER BY json_extract(fields, '$.{}') {}, seq ASC",
                field, dir
            ));
        }
        None => sql.push_str(" ORDER BY seq ASC"),
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(sql_err)?;

    let mut docs = Vec::new();
    for row in rows {
        let (id, raw) = row.map_err(sql_err)?;
        let fields = parse_fields(&id, &raw)?;
        docs.push(Document { id, fields });
    }
    Ok(docs)
}

fn read_fields(
    conn: &Connection,
    collection: &Collection,
    id: &str,
) -> Result<Option<Fields>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT fields FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection.path(), id],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_err)?;
    raw.map(|raw| parse_fields(id, &raw)).transpose()
}

fn write_fields(
    conn: &Connection,
    collection: &Collection,
    id: &str,
    fields: &Fields,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(fields).map_err(|e| StoreError::Backend(e.to_string()))?;
    conn.execute(
        "INSERT INTO documents (collection, id, fields) VALUES (?1, ?2, ?3)
         ON CONFLICT(collection, id) DO UPDATE SET fields = excluded.fields",
        params![collection.path(), id, raw],
    )
    .map_err(sql_err)?;
    Ok(())
}

fn insert_new(conn: &Connection, collection: &Collection, mut fields: Fields) -> Result<String, StoreError> {
    resolve_server_timestamps(&mut fields);
    let id = uuid::Uuid::now_v7().to_string();
    write_fields(conn, collection, &id, &fields)?;
    Ok(id)
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let query = query.clone();
        self.with_conn(move |conn| select(conn, &query)).await
    }

    async fn get(&self, collection: &Collection, id: &str) -> Result<Document, StoreError> {
        let collection = collection.clone();
        let id = id.to_string();
        self.with_conn(move |conn| {
            let fields = read_fields(conn, &collection, &id)?
                .ok_or_else(|| StoreError::not_found(&collection, &id))?;
            Ok(Document { id, fields })
        })
        .await
    }

    async fn insert(&self, collection: &Collection, fields: Fields) -> Result<String, StoreError> {
        let collection = collection.clone();
        self.with_conn(move |conn| insert_new(conn, &collection, fields))
            .await
    }

    async fn set(
        &self,
        collection: &Collection,
        id: &str,
        mut fields: Fields,
        merge: bool,
    ) -> Result<(), StoreError> {
        let collection = collection.clone();
        let id = id.to_string();
        self.with_conn(move |conn| {
            resolve_server_timestamps(&mut fields);
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_err)?;
            let merged = match read_fields(&tx, &collection, &id)? {
                Some(mut existing) if merge => {
                    existing.extend(fields);
                    existing
                }
                _ => fields,
            };
            write_fields(&tx, &collection, &id, &merged)?;
            tx.commit().map_err(sql_err)
        })
        .await
    }

    async fn update(
        &self,
        collection: &Collection,
        id: &str,
        mut partial: Fields,
    ) -> Result<(), StoreError> {
        let collection = collection.clone();
        let id = id.to_string();
        self.with_conn(move |conn| {
            resolve_server_timestamps(&mut partial);
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_err)?;
            let mut existing = read_fields(&tx, &collection, &id)?
                .ok_or_else(|| StoreError::not_found(&collection, &id))?;
            existing.extend(partial);
            write_fields(&tx, &collection, &id, &existing)?;
            tx.commit().map_err(sql_err)
        })
        .await
    }

    async fn delete(&self, collection: &Collection, id: &str) -> Result<(), StoreError> {
        let collection = collection.clone();
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection.path(), id],
            )
            .map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    async fn insert_unique(
        &self,
        collection: &Collection,
        key: &[Filter],
        fields: Fields,
    ) -> Result<InsertOutcome, StoreError> {
        let mut probe = Query::new(collection.clone()).limit(1);
        probe.filters = key.to_vec();
        let collection = collection.clone();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_err)?;
            if let Some(existing) = select(&tx, &probe)?.into_iter().next() {
                return Ok(InsertOutcome::Existing(existing.id));
            }
            let id = insert_new(&tx, &collection, fields)?;
            tx.commit().map_err(sql_err)?;
            Ok(InsertOutcome::Inserted(id))
        })
        .await
    }

    async fn delete_batch(&self, refs: &[DocRef]) -> BatchOutcome {
        let targets = refs.to_vec();
        let (_abandon, abandoned) = AbandonOnDrop::new();
        let result = self
            .with_conn(move |conn| {
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(sql_err)?;
                for target in &targets {
                    tx.execute(
                        "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                        params![target.collection.path(), target.id],
                    )
                    .map_err(sql_err)?;
                }
                // Dropping the transaction rolls it back.
                ensure_awaited(&abandoned)?;
                tx.commit().map_err(sql_err)?;
                Ok(targets)
            })
            .await;

        match result {
            Ok(deleted) => BatchOutcome {
                deleted,
                failed: Vec::new(),
            },
            Err(err) => {
                tracing::warn!("Batch delete rolled back: {}", err);
                BatchOutcome::all_failed(refs, err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, SqliteDocumentStore) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&tmp.path().join("store.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        (tmp, SqliteDocumentStore::new(pool))
    }

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips_fields() {
        let (_tmp, store) = store();
        let id = store
            .insert(
                &Collection::Posts,
                fields(json!({"title": "T", "userId": "u1", "createdAt": super::super::SERVER_TIMESTAMP})),
            )
            .await
            .unwrap();

        let doc = store.get(&Collection::Posts, &id).await.unwrap();
        assert_eq!(doc.str_field("title"), Some("T"));
        assert_ne!(doc.str_field("createdAt"), Some(super::super::SERVER_TIMESTAMP));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (_tmp, store) = store();
        let err = store.get(&Collection::Posts, "missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_twice_succeeds() {
        let (_tmp, store) = store();
        let like = store
            .insert(&Collection::Likes, fields(json!({"postId": "p1"})))
            .await
            .unwrap();
        store.delete(&Collection::Likes, &like).await.unwrap();
        assert!(store.delete(&Collection::Likes, &like).await.is_ok());
    }

    #[tokio::test]
    async fn query_uses_json_filters_and_order() {
        let (_tmp, store) = store();
        for (post, ts) in [("p1", "2025-01-02"), ("p2", "2025-01-01"), ("p1", "2025-01-01")] {
            store
                .insert(
                    &Collection::Comments(post.to_string()),
                    fields(json!({"text": ts, "createdAt": ts})),
                )
                .await
                .unwrap();
        }

        let docs = store
            .query(
                &Query::new(Collection::Comments("p1".into()))
                    .order_by("createdAt", Direction::Asc),
            )
            .await
            .unwrap();
        let texts: Vec<&str> = docs.iter().filter_map(|d| d.str_field("text")).collect();
        assert_eq!(texts, vec!["2025-01-01", "2025-01-02"]);
    }

    #[tokio::test]
    async fn update_touches_only_named_fields() {
        let (_tmp, store) = store();
        let id = store
            .insert(
                &Collection::Posts,
                fields(json!({"title": "T", "description": "D", "userId": "u1"})),
            )
            .await
            .unwrap();
        store
            .update(&Collection::Posts, &id, fields(json!({"title": "T2"})))
            .await
            .unwrap();

        let doc = store.get(&Collection::Posts, &id).await.unwrap();
        assert_eq!(doc.str_field("title"), Some("T2"));
        assert_eq!(doc.str_field("description"), Some("D"));
        assert_eq!(doc.str_field("userId"), Some("u1"));
    }

    #[tokio::test]
    async fn insert_unique_is_keyed() {
        let (_tmp, store) = store();
        let key = [Filter::eq("postId", "p1"), Filter::eq("userId", "u2")];
        let body = fields(json!({"postId": "p1", "userId": "u2"}));

        let first = store
            .insert_unique(&Collection::Likes, &key, body.clone())
            .await
            .unwrap();
        let second = store
            .insert_unique(&Collection::Likes, &key, body)
            .await
            .unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));
        assert!(matches!(second, InsertOutcome::Existing(_)));

        let likes = store.query(&Query::new(Collection::Likes)).await.unwrap();
        assert_eq!(likes.len(), 1);
    }

    #[tokio::test]
    async fn delete_batch_removes_everything() {
        let (_tmp, store) = store();
        let post = store
            .insert(&Collection::Posts, fields(json!({"title": "T"})))
            .await
            .unwrap();
        let like = store
            .insert(&Collection::Likes, fields(json!({"postId": post.clone()})))
            .await
            .unwrap();

        let outcome = store
            .delete_batch(&[
                DocRef::new(Collection::Likes, like),
                DocRef::new(Collection::Posts, post.clone()),
            ])
            .await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.deleted.len(), 2);
        assert!(store.get(&Collection::Posts, &post).await.is_err());
    }

    #[tokio::test]
    async fn abandoned_delete_batch_rolls_back() {
        let (_tmp, store) = store();
        let post = store
            .insert(&Collection::Posts, fields(json!({"title": "T"})))
            .await
            .unwrap();

        // Hold the write lock so the batch is still waiting when its caller gives up.
        let blocker = store.pool.get().unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

        let refs = [DocRef::new(Collection::Posts, post.clone())];
        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            store.delete_batch(&refs),
        )
        .await;
        assert!(timed_out.is_err());

        blocker.execute_batch("COMMIT").unwrap();
        drop(blocker);
        tokio::time::sleep(std::time::Duration::from_millis(1000)).await;

        assert!(store.get(&Collection::Posts, &post).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_field_names_are_rejected() {
        let (_tmp, store) = store();
        let err = store
            .query(&Query::new(Collection::Posts).where_eq("a') OR 1=1 --", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
