//! Live document store with query subscriptions.
//!
//! Every write re-runs the queries subscribed to the written collection and
//! diffs the new result against the previous one. The diff is delivered as
//! one [`QuerySnapshot`]: removals first, then additions and modifications
//! in result order.
//!
//! Deliveries are queued and drained one at a time. A listener that writes
//! to the store (or cancels its own subscription) while handling a delivery
//! does not re-enter another listener; the resulting deliveries are queued
//! behind the current one.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;
use std::rc::{Rc, Weak};

use anyhow::Context;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ErrorCode;
use crate::feed::ChangeEvent;
use crate::model::{Document, RecordId};
use crate::source::{
    Collection, Delivery, Direction, FieldUpdate, Listener, LiveDataSource, MutationSink,
    PointLookup, QueryDescriptor, QueryError, QuerySnapshot, SourceError, Subscription,
};

/// Length of generated record ids (hex characters of a blake3 digest).
pub const ID_HEX_LEN: usize = 20;

/// Errors raised by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored body for {collection}/{id} is not valid JSON: {source}")]
    CorruptBody {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Sqlite(_) | Self::Encode(_) => ErrorCode::StoreWriteFailed,
            Self::CorruptBody { .. } => ErrorCode::CorruptStore,
            Self::Query(_) => ErrorCode::InvalidQuery,
        }
    }
}

struct SubState {
    query: QueryDescriptor,
    /// Taken out while the listener runs.
    listener: Option<Listener>,
    /// Previous result: id -> stored body text.
    last: BTreeMap<RecordId, String>,
    last_order: Vec<RecordId>,
}

struct StoreInner {
    conn: Connection,
    subs: RefCell<BTreeMap<u64, SubState>>,
    next_sub: Cell<u64>,
    id_counter: Cell<u64>,
    queue: RefCell<VecDeque<(u64, Delivery)>>,
    draining: Cell<bool>,
}

/// Cheaply cloneable handle to a document store.
#[derive(Clone)]
pub struct LocalStore {
    inner: Rc<StoreInner>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Open the store at `path`, creating and migrating it as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = super::open_store(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub fn in_memory() -> anyhow::Result<Self> {
        let mut conn = Connection::open_in_memory().context("open in-memory store")?;
        super::migrations::migrate(&mut conn).context("apply store migrations")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                conn,
                subs: RefCell::new(BTreeMap::new()),
                next_sub: Cell::new(1),
                id_counter: Cell::new(0),
                queue: RefCell::new(VecDeque::new()),
                draining: Cell::new(false),
            }),
        }
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subs.borrow().len()
    }

    /// Insert or replace a document under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn put(
        &self,
        collection: Collection,
        id: &RecordId,
        doc: &Document,
    ) -> Result<(), StoreError> {
        self.write_body(collection, id, doc)?;
        self.notify(collection);
        Ok(())
    }

    /// Delete a document. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete(&self, collection: Collection, id: &RecordId) -> Result<bool, StoreError> {
        let removed = self.inner.conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id.as_str()],
        )?;
        if removed > 0 {
            self.notify(collection);
        }
        Ok(removed > 0)
    }

    /// Read one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the stored body is corrupt.
    pub fn fetch(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<Option<Document>, StoreError> {
        let body: Option<String> = self
            .inner
            .conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| parse_body(collection, id, &b)).transpose()
    }

    /// Run a query once, without subscribing.
    ///
    /// # Errors
    ///
    /// Returns an error if the query is invalid or a body is corrupt.
    pub fn query(&self, query: &QueryDescriptor) -> Result<Vec<(RecordId, Document)>, StoreError> {
        query.validate()?;
        self.run_query(query)?
            .into_iter()
            .map(|(id, body)| {
                let doc = parse_body(query.collection, &id, &body)?;
                Ok((id, doc))
            })
            .collect()
    }

    /// Number of documents in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the count query fails.
    pub fn count(&self, collection: Collection) -> Result<u64, StoreError> {
        let n: i64 = self.inner.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            [collection.as_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Store a new document under a generated id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn insert(&self, collection: Collection, doc: &Document) -> Result<RecordId, StoreError> {
        let id = self.generate_id(collection, doc)?;
        self.put(collection, &id, doc)?;
        Ok(id)
    }

    /// Apply field updates, creating an empty document first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the read or write fails.
    pub fn apply_updates(
        &self,
        collection: Collection,
        id: &RecordId,
        updates: &[FieldUpdate],
    ) -> Result<(), StoreError> {
        let mut doc = self.fetch(collection, id)?.unwrap_or_default();
        for update in updates {
            update.apply_to(&mut doc);
        }
        self.put(collection, id, &doc)
    }

    fn generate_id(&self, collection: Collection, doc: &Document) -> Result<RecordId, StoreError> {
        let counter = self.inner.id_counter.get().wrapping_add(1);
        self.inner.id_counter.set(counter);
        let body = serde_json::to_string(doc).map_err(StoreError::Encode)?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(collection.as_str().as_bytes());
        hasher.update(body.as_bytes());
        hasher.update(&chrono::Utc::now().timestamp_micros().to_le_bytes());
        hasher.update(&counter.to_le_bytes());
        let hex = hasher.finalize().to_hex();
        Ok(RecordId::new(&hex.as_str()[..ID_HEX_LEN]))
    }

    fn write_body(
        &self,
        collection: Collection,
        id: &RecordId,
        doc: &Document,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(doc).map_err(StoreError::Encode)?;
        self.inner.conn.execute(
            "INSERT INTO documents (collection, id, body, updated_at_us)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, id) DO UPDATE SET
                body = excluded.body,
                updated_at_us = excluded.updated_at_us",
            params![
                collection.as_str(),
                id.as_str(),
                body,
                chrono::Utc::now().timestamp_micros()
            ],
        )?;
        Ok(())
    }

    fn run_query(&self, query: &QueryDescriptor) -> Result<Vec<(RecordId, String)>, StoreError> {
        let mut sql = String::from("SELECT id, body FROM documents WHERE collection = ?");
        let mut binds: Vec<SqlValue> = vec![SqlValue::Text(query.collection.as_str().to_string())];

        if let Some(id) = &query.document {
            sql.push_str(" AND id = ?");
            binds.push(SqlValue::Text(id.as_str().to_string()));
        }
        if let Some(filter) = &query.filter {
            sql.push_str(" AND json_extract(body, ?) ");
            sql.push_str(filter.op.sql());
            sql.push_str(" ?");
            binds.push(SqlValue::Text(json_path(&filter.field)));
            binds.push(sql_value(&filter.value));
        }
        match &query.order_by {
            Some(order) => {
                let dir = match order.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                sql.push_str(" ORDER BY json_extract(body, ?) ");
                sql.push_str(dir);
                sql.push_str(", id ASC");
                binds.push(SqlValue::Text(json_path(&order.field)));
            }
            None => sql.push_str(" ORDER BY id ASC"),
        }
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            binds.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let mut stmt = self.inner.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds), |row| {
            Ok((RecordId::new(row.get::<_, String>(0)?), row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn notify(&self, collection: Collection) {
        let ids: Vec<u64> = self
            .inner
            .subs
            .borrow()
            .iter()
            .filter(|(_, s)| s.query.collection == collection)
            .map(|(id, _)| *id)
            .collect();

        for sub_id in ids {
            let Some(query) = self
                .inner
                .subs
                .borrow()
                .get(&sub_id)
                .map(|s| s.query.clone())
            else {
                continue;
            };
            match self.run_query(&query) {
                Ok(rows) => {
                    if let Some(snapshot) = self.diff(sub_id, rows) {
                        self.enqueue(sub_id, Delivery::Snapshot(snapshot));
                    }
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "live query refresh failed");
                    self.enqueue(
                        sub_id,
                        Delivery::Error(SourceError {
                            code: e.code(),
                            message: e.to_string(),
                        }),
                    );
                }
            }
        }
        self.drain();
    }

    /// Diff new rows against the subscription's last result and record them.
    /// Returns `None` when nothing changed.
    fn diff(&self, sub_id: u64, rows: Vec<(RecordId, String)>) -> Option<QuerySnapshot> {
        let mut subs = self.inner.subs.borrow_mut();
        let sub = subs.get_mut(&sub_id)?;
        let collection = sub.query.collection;

        let current: HashSet<&RecordId> = rows.iter().map(|(id, _)| id).collect();
        let mut changes = Vec::new();
        for id in &sub.last_order {
            if !current.contains(id) {
                changes.push(ChangeEvent::removed(id.clone()));
            }
        }
        for (id, body) in &rows {
            let changed = match sub.last.get(id) {
                None => Some(true),
                Some(prev) if prev != body => Some(false),
                Some(_) => None,
            };
            let Some(added) = changed else { continue };
            match parse_body(collection, id, body) {
                Ok(doc) if added => changes.push(ChangeEvent::added(id.clone(), doc)),
                Ok(doc) => changes.push(ChangeEvent::modified(id.clone(), doc)),
                Err(e) if added => warn!(error = %e, "skipping corrupt document"),
                Err(e) => {
                    warn!(error = %e, "withdrawing document with corrupt body");
                    changes.push(ChangeEvent::removed(id.clone()));
                }
            }
        }

        let order: Vec<RecordId> = rows.iter().map(|(id, _)| id.clone()).collect();
        if changes.is_empty() && order == sub.last_order {
            return None;
        }
        sub.last = rows.into_iter().collect();
        sub.last_order.clone_from(&order);
        Some(QuerySnapshot { changes, order })
    }

    fn enqueue(&self, sub_id: u64, delivery: Delivery) {
        self.inner.queue.borrow_mut().push_back((sub_id, delivery));
    }

    fn drain(&self) {
        if self.inner.draining.replace(true) {
            return;
        }
        loop {
            let next = self.inner.queue.borrow_mut().pop_front();
            let Some((sub_id, delivery)) = next else { break };

            let listener = self
                .inner
                .subs
                .borrow_mut()
                .get_mut(&sub_id)
                .and_then(|s| s.listener.take());
            let Some(mut listener) = listener else {
                continue;
            };
            listener(delivery);

            // Cancelled from inside its own listener: drop it outside the borrow.
            let orphaned = match self.inner.subs.borrow_mut().get_mut(&sub_id) {
                Some(sub) => {
                    sub.listener = Some(listener);
                    None
                }
                None => Some(listener),
            };
            drop(orphaned);
        }
        self.inner.draining.set(false);
    }
}

impl LiveDataSource for LocalStore {
    fn subscribe(
        &self,
        query: QueryDescriptor,
        listener: Listener,
    ) -> anyhow::Result<Subscription> {
        query
            .validate()
            .with_context(|| format!("invalid live query {query}"))?;
        let rows = self
            .run_query(&query)
            .with_context(|| format!("run live query {query}"))?;

        let sub_id = self.inner.next_sub.get();
        self.inner.next_sub.set(sub_id + 1);
        let label = query.to_string();
        info!(query = %label, subscription = sub_id, "subscribed");

        self.inner.subs.borrow_mut().insert(
            sub_id,
            SubState {
                query,
                listener: Some(listener),
                last: BTreeMap::new(),
                last_order: Vec::new(),
            },
        );

        let snapshot = self.diff(sub_id, rows).unwrap_or_default();
        self.enqueue(sub_id, Delivery::Snapshot(snapshot));

        let weak: Weak<StoreInner> = Rc::downgrade(&self.inner);
        let subscription = Subscription::new(label, move || {
            if let Some(inner) = weak.upgrade() {
                let removed = inner.subs.borrow_mut().remove(&sub_id);
                inner.queue.borrow_mut().retain(|(id, _)| *id != sub_id);
                debug!(subscription = sub_id, "unsubscribed");
                drop(removed);
            }
        });

        self.drain();
        Ok(subscription)
    }
}

impl PointLookup for LocalStore {
    fn get(&self, collection: Collection, id: &RecordId) -> anyhow::Result<Option<Document>> {
        self.fetch(collection, id)
            .with_context(|| format!("read {collection}/{id}"))
    }
}

impl MutationSink for LocalStore {
    fn submit(&self, collection: Collection, doc: Document) -> anyhow::Result<RecordId> {
        self.insert(collection, &doc)
            .with_context(|| format!("submit to {collection}"))
    }

    fn update(
        &self,
        collection: Collection,
        id: &RecordId,
        updates: &[FieldUpdate],
    ) -> anyhow::Result<()> {
        self.apply_updates(collection, id, updates)
            .with_context(|| format!("update {collection}/{id}"))
    }
}

fn parse_body(collection: Collection, id: &RecordId, body: &str) -> Result<Document, StoreError> {
    serde_json::from_str(body).map_err(|source| StoreError::CorruptBody {
        collection: collection.as_str().to_string(),
        id: id.as_str().to_string(),
        source,
    })
}

fn json_path(field: &str) -> String {
    format!("$.{field}")
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map_or_else(|| SqlValue::Real(n.as_f64().unwrap_or(0.0)), SqlValue::Integer),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Null | Value::Array(_) | Value::Object(_) => SqlValue::Null,
    }
}
