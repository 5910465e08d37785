use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde_json::{Map, Value};
use tracing::warn;

use super::{
    apply_patch, Change, ChangeFeed, CollectionPath, DocPath, Document, DocumentStore, Query,
    StoreError, StoreResult, Transaction, TransactionFn, WriteBatch, WriteOp,
};
use crate::db::PgPool;
use crate::error::{AppError, AppResult};
use crate::schema::documents;

const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

#[derive(Debug, Queryable)]
struct DocumentRow {
    path: String,
    #[allow(dead_code)]
    collection: String,
    data: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DocumentRow {
    fn into_document(self) -> StoreResult<Document> {
        Ok(Document {
            path: DocPath::parse(&self.path)?,
            data: self.data,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
struct NewDocumentRow<'a> {
    path: &'a str,
    collection: &'a str,
    data: &'a Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Document store backed by a single `documents` table keyed by path.
pub struct PgDocumentStore {
    pool: PgPool,
    feed: ChangeFeed,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            feed: ChangeFeed::default(),
        }
    }

    async fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| StoreError::Unavailable(format!("database pool error: {err}")))?;
            f(&mut *conn)
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("database task failed: {err}")))?
    }
}

fn load_row(
    conn: &mut PgConnection,
    path: &DocPath,
    lock: bool,
) -> StoreResult<Option<DocumentRow>> {
    let query = documents::table.find(path.as_str());
    let row = if lock {
        query.for_update().first::<DocumentRow>(conn).optional()?
    } else {
        query.first::<DocumentRow>(conn).optional()?
    };
    Ok(row)
}

fn write_body(conn: &mut PgConnection, path: &DocPath, data: &Value) -> StoreResult<()> {
    let now = Utc::now();
    let collection = path.collection();
    let row = NewDocumentRow {
        path: path.as_str(),
        collection: collection.as_str(),
        data,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(documents::table)
        .values(&row)
        .on_conflict(documents::path)
        .do_update()
        .set((documents::data.eq(data), documents::updated_at.eq(now)))
        .execute(conn)?;
    Ok(())
}

fn apply_op(conn: &mut PgConnection, op: WriteOp) -> StoreResult<Option<Change>> {
    match op {
        WriteOp::Set { path, data } => {
            write_body(conn, &path, &data)?;
            Ok(Some(Change::Written(path)))
        }
        WriteOp::Update { path, patch } => {
            let row =
                load_row(conn, &path, true)?.ok_or_else(|| StoreError::NotFound(path.to_string()))?;
            let mut data = row.data;
            apply_patch(&mut data, &patch);
            diesel::update(documents::table.find(path.as_str()))
                .set((
                    documents::data.eq(&data),
                    documents::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            Ok(Some(Change::Written(path)))
        }
        WriteOp::Delete { path } => {
            let deleted = diesel::delete(documents::table.find(path.as_str())).execute(conn)?;
            Ok((deleted > 0).then_some(Change::Deleted(path)))
        }
    }
}

fn is_serialization_failure(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Database(DieselError::DatabaseError(
            DatabaseErrorKind::SerializationFailure,
            _
        ))
    )
}

enum TxnFailure {
    Conflict,
    Rejected(AppError),
    Store(StoreError),
}

impl From<DieselError> for TxnFailure {
    fn from(value: DieselError) -> Self {
        let err = StoreError::Database(value);
        if is_serialization_failure(&err) {
            TxnFailure::Conflict
        } else {
            TxnFailure::Store(err)
        }
    }
}

struct PgTransaction<'a> {
    conn: &'a mut PgConnection,
    writes: Vec<WriteOp>,
    conflicted: bool,
}

impl Transaction for PgTransaction<'_> {
    fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>> {
        match load_row(self.conn, path, true) {
            Ok(row) => row.map(DocumentRow::into_document).transpose(),
            Err(err) => {
                if is_serialization_failure(&err) {
                    self.conflicted = true;
                }
                Err(err)
            }
        }
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

fn run_serializable(pool: PgPool, mut body: TransactionFn) -> AppResult<Vec<Change>> {
    let mut conn = pool
        .get()
        .map_err(|err| AppError::unavailable(format!("database pool error: {err}")))?;

    let mut attempt = 1;
    loop {
        let outcome = conn
            .build_transaction()
            .serializable()
            .run::<_, TxnFailure, _>(|conn| {
                let writes = {
                    let mut txn = PgTransaction {
                        conn: &mut *conn,
                        writes: Vec::new(),
                        conflicted: false,
                    };
                    if let Err(err) = body(&mut txn) {
                        return Err(if txn.conflicted {
                            TxnFailure::Conflict
                        } else {
                            TxnFailure::Rejected(err)
                        });
                    }
                    txn.writes
                };

                let mut changes = Vec::with_capacity(writes.len());
                for op in writes {
                    match apply_op(conn, op) {
                        Ok(Some(change)) => changes.push(change),
                        Ok(None) => {}
                        Err(err) if is_serialization_failure(&err) => {
                            return Err(TxnFailure::Conflict)
                        }
                        Err(err) => return Err(TxnFailure::Store(err)),
                    }
                }
                Ok(changes)
            });

        match outcome {
            Ok(changes) => return Ok(changes),
            Err(TxnFailure::Conflict) if attempt < MAX_TRANSACTION_ATTEMPTS => {
                warn!(attempt, "transaction conflicted, retrying");
                attempt += 1;
            }
            Err(TxnFailure::Conflict) => {
                return Err(AppError::unavailable(
                    "transaction kept conflicting, try again",
                ))
            }
            Err(TxnFailure::Rejected(err)) => return Err(err),
            Err(TxnFailure::Store(err)) => return Err(err.into()),
        }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        let path = path.clone();
        self.with_conn(move |conn| {
            load_row(conn, &path, false)?
                .map(DocumentRow::into_document)
                .transpose()
        })
        .await
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        query: &Query,
    ) -> StoreResult<Vec<Document>> {
        let collection = collection.as_str().to_string();
        let rows = self
            .with_conn(move |conn| {
                let rows = documents::table
                    .filter(documents::collection.eq(collection.as_str()))
                    .order(documents::path.asc())
                    .load::<DocumentRow>(conn)?;
                Ok(rows)
            })
            .await?;
        let documents = rows
            .into_iter()
            .map(DocumentRow::into_document)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(query.apply(documents))
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let ops = batch.into_ops();
        let changes = self
            .with_conn(move |conn| {
                conn.transaction::<_, StoreError, _>(|conn| {
                    let mut changes = Vec::with_capacity(ops.len());
                    for op in ops {
                        if let Some(change) = apply_op(conn, op)? {
                            changes.push(change);
                        }
                    }
                    Ok(changes)
                })
            })
            .await?;
        for change in changes {
            self.feed.publish(change);
        }
        Ok(())
    }

    async fn run_transaction(&self, body: TransactionFn) -> AppResult<()> {
        let pool = self.pool.clone();
        let changes = tokio::task::spawn_blocking(move || run_serializable(pool, body))
            .await
            .map_err(|err| AppError::unavailable(format!("transaction task failed: {err}")))??;
        for change in changes {
            self.feed.publish(change);
        }
        Ok(())
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }
}
