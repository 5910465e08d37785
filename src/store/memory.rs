use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{
    apply_patch, Change, ChangeFeed, CollectionPath, DocPath, Document, DocumentStore, Query,
    StoreError, StoreResult, Transaction, TransactionFn, WriteBatch, WriteOp,
};
use crate::error::AppResult;

#[derive(Debug, Clone)]
struct StoredDoc {
    data: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Process-local store. Every operation, transactions included, runs under a
/// single lock, so transactions are trivially serializable.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<DocPath, StoredDoc>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, BTreeMap<DocPath, StoredDoc>>> {
        self.docs
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    pub fn document_count(&self) -> usize {
        self.lock().map(|docs| docs.len()).unwrap_or(0)
    }
}

fn to_document(path: &DocPath, stored: &StoredDoc) -> Document {
    Document {
        path: path.clone(),
        data: stored.data.clone(),
        created_at: stored.created_at,
        updated_at: stored.updated_at,
    }
}

// Validates every update target before touching the map so a failing op
// leaves nothing half-applied.
fn apply_ops(
    docs: &mut BTreeMap<DocPath, StoredDoc>,
    ops: Vec<WriteOp>,
) -> StoreResult<Vec<Change>> {
    let mut present: HashMap<&DocPath, bool> = HashMap::new();
    for op in &ops {
        match op {
            WriteOp::Set { path, .. } => {
                present.insert(path, true);
            }
            WriteOp::Update { path, .. } => {
                let exists = present
                    .get(path)
                    .copied()
                    .unwrap_or_else(|| docs.contains_key(path));
                if !exists {
                    return Err(StoreError::NotFound(path.to_string()));
                }
            }
            WriteOp::Delete { path } => {
                present.insert(path, false);
            }
        }
    }
    drop(present);

    let now = Utc::now();
    let mut changes = Vec::with_capacity(ops.len());
    for op in ops {
        match op {
            WriteOp::Set { path, data } => {
                let created_at = docs.get(&path).map(|doc| doc.created_at).unwrap_or(now);
                docs.insert(
                    path.clone(),
                    StoredDoc {
                        data,
                        created_at,
                        updated_at: now,
                    },
                );
                changes.push(Change::Written(path));
            }
            WriteOp::Update { path, patch } => {
                if let Some(doc) = docs.get_mut(&path) {
                    apply_patch(&mut doc.data, &patch);
                    doc.updated_at = now;
                    changes.push(Change::Written(path));
                }
            }
            WriteOp::Delete { path } => {
                if docs.remove(&path).is_some() {
                    changes.push(Change::Deleted(path));
                }
            }
        }
    }
    Ok(changes)
}

struct MemoryTransaction<'a> {
    docs: &'a BTreeMap<DocPath, StoredDoc>,
    writes: Vec<WriteOp>,
}

impl Transaction for MemoryTransaction<'_> {
    fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>> {
        Ok(self.docs.get(path).map(|stored| to_document(path, stored)))
    }

    fn set(&mut self, path: &DocPath, data: Value) {
        self.writes.push(WriteOp::Set {
            path: path.clone(),
            data,
        });
    }

    fn update(&mut self, path: &DocPath, patch: Map<String, Value>) {
        self.writes.push(WriteOp::Update {
            path: path.clone(),
            patch,
        });
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        let docs = self.lock()?;
        Ok(docs.get(path).map(|stored| to_document(path, stored)))
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        query: &Query,
    ) -> StoreResult<Vec<Document>> {
        let docs = self.lock()?;
        let members = docs
            .iter()
            .filter(|(path, _)| &path.collection() == collection)
            .map(|(path, stored)| to_document(path, stored))
            .collect();
        Ok(query.apply(members))
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let changes = {
            let mut docs = self.lock()?;
            apply_ops(&mut docs, batch.into_ops())?
        };
        for change in changes {
            self.feed.publish(change);
        }
        Ok(())
    }

    async fn run_transaction(&self, mut body: TransactionFn) -> AppResult<()> {
        let changes = {
            let mut docs = self.lock()?;
            let writes = {
                let mut txn = MemoryTransaction {
                    docs: &*docs,
                    writes: Vec::new(),
                };
                body(&mut txn)?;
                txn.writes
            };
            apply_ops(&mut docs, writes)?
        };
        for change in changes {
            self.feed.publish(change);
        }
        Ok(())
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use serde_json::json;

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        let items = CollectionPath::root("items");

        let mut batch = WriteBatch::new();
        batch.set(items.doc("a").unwrap(), json!({ "n": 1 }));
        batch.update(items.doc("missing").unwrap(), Map::new());
        let result = store.commit(batch).await;

        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert!(store.get(&items.doc("a").unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_is_scoped_to_direct_children() {
        let store = MemoryStore::new();
        let campaigns = CollectionPath::root("campaigns");
        store.set(&campaigns.doc("c1").unwrap(), json!({})).await.unwrap();
        let participant = DocPath::parse("campaigns/c1/participants/p1").unwrap();
        store.set(&participant, json!({})).await.unwrap();

        let found = store.query(&campaigns, &Query::new()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "c1");
    }

    #[tokio::test]
    async fn rejected_transaction_discards_staged_writes() {
        let store = MemoryStore::new();
        let path = CollectionPath::root("counters").doc("c").unwrap();
        store.set(&path, json!({ "value": 1 })).await.unwrap();

        let target = path.clone();
        let result = store
            .run_transaction(Box::new(move |txn: &mut dyn Transaction| -> AppResult<()> {
                let mut patch = Map::new();
                patch.insert("value".into(), json!(2));
                txn.update(&target, patch);
                Err(AppError::stale_invite())
            }))
            .await;

        assert!(result.is_err());
        let doc = store.get(&path).await.unwrap().unwrap();
        assert_eq!(doc.data["value"], json!(1));
    }

    #[tokio::test]
    async fn commits_notify_subscribers() {
        let store = MemoryStore::new();
        let donors = CollectionPath::parse("campaigns/c/participants/p/donors").unwrap();
        let mut subscription = store.subscribe(&donors);

        let path = store.add(&donors, json!({ "firstName": "Sam" })).await.unwrap();
        assert_eq!(subscription.changed().await, Some(Change::Written(path)));
    }
}
