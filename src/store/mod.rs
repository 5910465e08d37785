//! Hierarchical document store.
//!
//! Documents live under slash-separated paths such as
//! `campaigns/{id}/participants/{id}`: an even number of segments names a
//! document, an odd number names a collection. Bodies are JSON objects; a
//! document's id is its final path segment and is never stored in the body.

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppResult;

pub mod feed;
pub mod memory;
pub mod paths;
pub mod postgres;

pub use feed::{Change, ChangeFeed, Subscription};
pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {0} not found")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("malformed document {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

fn split_segments(raw: &str) -> StoreResult<Vec<&str>> {
    let segments: Vec<&str> = raw.split('/').collect();
    if segments.iter().any(|segment| segment.trim().is_empty()) {
        return Err(StoreError::InvalidPath(raw.to_string()));
    }
    Ok(segments)
}

/// A single id or collection name appended to a path. Ids reach here from
/// URLs, so a `/` would otherwise address a different kind of document.
fn check_segment<'a>(base: &str, segment: &'a str) -> StoreResult<&'a str> {
    if segment.contains('/') || segment.trim().is_empty() {
        return Err(StoreError::InvalidPath(format!("{base}/{segment}")));
    }
    Ok(segment)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DocPath(String);

impl DocPath {
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let segments = split_segments(raw)?;
        if segments.len() % 2 != 0 {
            return Err(StoreError::InvalidPath(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn collection(&self) -> CollectionPath {
        let cut = self.0.rfind('/').unwrap_or(0);
        CollectionPath(self.0[..cut].to_string())
    }

    pub fn child(&self, collection: &str) -> StoreResult<CollectionPath> {
        let name = check_segment(&self.0, collection)?;
        Ok(CollectionPath(format!("{}/{}", self.0, name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn parse(raw: &str) -> StoreResult<Self> {
        let segments = split_segments(raw)?;
        if segments.len() % 2 != 1 {
            return Err(StoreError::InvalidPath(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn doc(&self, id: &str) -> StoreResult<DocPath> {
        let id = check_segment(&self.0, id)?;
        Ok(DocPath(format!("{}/{}", self.0, id)))
    }

    /// Path for a new document with a generated id.
    pub fn new_doc(&self) -> DocPath {
        DocPath(format!("{}/{}", self.0, new_document_id()))
    }

    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn new_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub path: DocPath,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    /// Decodes the body into a model, injecting the document id as `id`.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        let mut body = match &self.data {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        body.insert("id".to_string(), Value::String(self.id().to_string()));
        serde_json::from_value(Value::Object(body)).map_err(|source| StoreError::Malformed {
            path: self.path.to_string(),
            source,
        })
    }
}

/// Serializes a model into a storable body, dropping its `id` field.
pub fn to_body<T: Serialize>(model: &T) -> StoreResult<Value> {
    let mut value = serde_json::to_value(model).map_err(|source| StoreError::Malformed {
        path: "<new>".to_string(),
        source,
    })?;
    if let Value::Object(map) = &mut value {
        map.remove("id");
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    ArrayContains(String, Value),
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    filters: Vec<Filter>,
    order_by: Option<(String, Direction)>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    pub fn array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters
            .push(Filter::ArrayContains(field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, data: &Value) -> bool {
        self.filters.iter().all(|filter| match filter {
            Filter::Eq(field, expected) => lookup(data, field) == Some(expected),
            Filter::ArrayContains(field, expected) => match lookup(data, field) {
                Some(Value::Array(items)) => items.contains(expected),
                _ => false,
            },
        })
    }

    /// Filters, orders and truncates documents already scoped to one collection.
    pub fn apply(&self, documents: Vec<Document>) -> Vec<Document> {
        let mut selected: Vec<Document> = documents
            .into_iter()
            .filter(|doc| self.matches(&doc.data))
            .collect();

        if let Some((field, direction)) = &self.order_by {
            selected.sort_by(|a, b| {
                let ordering = compare_fields(lookup(&a.data, field), lookup(&b.data, field));
                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

/// Resolves a dotted field path (`createdBy.id`) inside a body.
pub fn lookup<'a>(data: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(data, |current, segment| current.get(segment))
}

// Missing values sort after present ones in ascending order.
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_values(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => {
            match (
                DateTime::parse_from_rfc3339(a),
                DateTime::parse_from_rfc3339(b),
            ) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// Merges a field patch into a body. Dotted keys address nested fields,
/// creating intermediate objects as needed.
pub fn apply_patch(target: &mut Value, patch: &Map<String, Value>) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    for (key, value) in patch {
        let mut cursor = &mut *target;
        let mut segments = key.split('.').peekable();
        while let Some(segment) = segments.next() {
            let Value::Object(map) = cursor else {
                break;
            };
            if segments.peek().is_none() {
                map.insert(segment.to_string(), value.clone());
                break;
            }
            let entry = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            cursor = entry;
        }
    }
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    Set { path: DocPath, data: Value },
    Update { path: DocPath, patch: Map<String, Value> },
    Delete { path: DocPath },
}

impl WriteOp {
    pub fn path(&self) -> &DocPath {
        match self {
            WriteOp::Set { path, .. } | WriteOp::Update { path, .. } | WriteOp::Delete { path } => {
                path
            }
        }
    }
}

/// Writes committed atomically: either every operation lands or none does.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: DocPath, data: Value) -> &mut Self {
        self.ops.push(WriteOp::Set { path, data });
        self
    }

    pub fn update(&mut self, path: DocPath, patch: Map<String, Value>) -> &mut Self {
        self.ops.push(WriteOp::Update { path, patch });
        self
    }

    pub fn delete(&mut self, path: DocPath) -> &mut Self {
        self.ops.push(WriteOp::Delete { path });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Read-modify-write view handed to a transaction body. Writes are staged and
/// applied only when the body returns `Ok`.
pub trait Transaction {
    fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>>;
    fn set(&mut self, path: &DocPath, data: Value);
    fn update(&mut self, path: &DocPath, patch: Map<String, Value>);
}

pub type TransactionFn = Box<dyn FnMut(&mut dyn Transaction) -> AppResult<()> + Send>;

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>>;

    async fn query(&self, collection: &CollectionPath, query: &Query)
        -> StoreResult<Vec<Document>>;

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Runs `body` atomically against a consistent view. The body may be
    /// invoked more than once when the backend retries on contention.
    async fn run_transaction(&self, body: TransactionFn) -> AppResult<()>;

    fn changes(&self) -> &ChangeFeed;

    async fn set(&self, path: &DocPath, data: Value) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.set(path.clone(), data);
        self.commit(batch).await
    }

    async fn update(&self, path: &DocPath, patch: Map<String, Value>) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.update(path.clone(), patch);
        self.commit(batch).await
    }

    async fn delete(&self, path: &DocPath) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(path.clone());
        self.commit(batch).await
    }

    async fn add(&self, collection: &CollectionPath, data: Value) -> StoreResult<DocPath> {
        let path = collection.new_doc();
        self.set(&path, data).await?;
        Ok(path)
    }

    fn subscribe(&self, collection: &CollectionPath) -> Subscription {
        self.changes().subscribe(collection.clone())
    }
}

pub async fn get_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &DocPath,
) -> StoreResult<Option<T>> {
    match store.get(path).await? {
        Some(doc) => Ok(Some(doc.decode()?)),
        None => Ok(None),
    }
}

pub async fn query_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &CollectionPath,
    query: &Query,
) -> StoreResult<Vec<T>> {
    store
        .query(collection, query)
        .await?
        .iter()
        .map(Document::decode)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(path: &str, data: Value) -> Document {
        let now = Utc::now();
        Document {
            path: DocPath::parse(path).unwrap(),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn paths_alternate_collections_and_documents() {
        let path = DocPath::parse("campaigns/c1/participants/p1").unwrap();
        assert_eq!(path.id(), "p1");
        assert_eq!(path.collection().as_str(), "campaigns/c1/participants");
        assert_eq!(
            path.child("donors").unwrap().as_str(),
            "campaigns/c1/participants/p1/donors"
        );
        assert!(DocPath::parse("campaigns").is_err());
        assert!(DocPath::parse("campaigns//x").is_err());
        assert!(CollectionPath::parse("campaigns/c1").is_err());
    }

    #[test]
    fn appended_ids_stay_one_segment() {
        let participants = CollectionPath::parse("campaigns/c1/participants").unwrap();
        for bad in ["p1/guardians/g1", "", "  ", "p1/"] {
            assert!(
                matches!(participants.doc(bad), Err(StoreError::InvalidPath(_))),
                "accepted {bad:?}"
            );
        }
        let participant = participants.doc("p1").unwrap();
        assert!(participant.child("donors/d1/messages").is_err());
        assert_eq!(participant.as_str(), "campaigns/c1/participants/p1");
    }

    #[test]
    fn patch_addresses_nested_fields() {
        let mut body = json!({ "firstName": "Ada", "messageStatuses": { "1": { "sent": false } } });
        let mut patch = Map::new();
        patch.insert("messageStatuses.2".into(), json!({ "sent": true }));
        patch.insert("lastName".into(), json!("Lovelace"));
        apply_patch(&mut body, &patch);

        assert_eq!(body["messageStatuses"]["1"]["sent"], json!(false));
        assert_eq!(body["messageStatuses"]["2"]["sent"], json!(true));
        assert_eq!(body["lastName"], json!("Lovelace"));
    }

    #[test]
    fn query_filters_orders_and_limits() {
        let docs = vec![
            doc("logs/a", json!({ "timestamp": "2024-03-01T10:00:00Z", "kind": "x", "tags": ["t"] })),
            doc("logs/b", json!({ "timestamp": "2024-03-01T10:00:00.500Z", "kind": "x" })),
            doc("logs/c", json!({ "timestamp": "2024-02-01T00:00:00Z", "kind": "y", "tags": ["t"] })),
        ];

        let newest = Query::new()
            .where_eq("kind", "x")
            .order_by("timestamp", Direction::Descending)
            .limit(1)
            .apply(docs.clone());
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].id(), "b");

        let tagged = Query::new().array_contains("tags", "t").apply(docs);
        let ids: Vec<&str> = tagged.iter().map(Document::id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn decode_injects_document_id() {
        #[derive(serde::Deserialize)]
        struct Named {
            id: String,
            name: String,
        }
        let named: Named = doc("things/t-1", json!({ "name": "thing" })).decode().unwrap();
        assert_eq!(named.id, "t-1");
        assert_eq!(named.name, "thing");
    }
}
