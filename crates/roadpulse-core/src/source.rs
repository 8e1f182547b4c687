//! Collaborator interfaces of the live data source.
//!
//! Views never talk to a backend directly. They describe what they want as a
//! [`QueryDescriptor`], register a [`Listener`] through [`LiveDataSource`],
//! and hold the returned [`Subscription`] for as long as the view is open.
//! Dropping the subscription cancels it.

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;
use crate::feed::ChangeEvent;
use crate::model::{Document, RecordId};

/// Named document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    #[serde(rename = "trafficData")]
    TrafficData,
    #[serde(rename = "trafficStats")]
    TrafficStats,
    #[serde(rename = "reports")]
    Reports,
    #[serde(rename = "users")]
    Users,
    #[serde(rename = "leaderboard")]
    Leaderboard,
}

impl Collection {
    pub const ALL: [Self; 5] = [
        Self::TrafficData,
        Self::TrafficStats,
        Self::Reports,
        Self::Users,
        Self::Leaderboard,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TrafficData => "trafficData",
            Self::TrafficStats => "trafficStats",
            Self::Reports => "reports",
            Self::Users => "users",
            Self::Leaderboard => "leaderboard",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

impl FilterOp {
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "=",
        }
    }
}

/// `field <op> value` predicate on a document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// What a view subscribes to.
///
/// Either a single document (`document` set) or a filtered, optionally
/// ordered and limited collection query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub collection: Collection,
    #[serde(default)]
    pub document: Option<RecordId>,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QueryDescriptor {
    #[must_use]
    pub const fn collection(collection: Collection) -> Self {
        Self {
            collection,
            document: None,
            filter: None,
            order_by: None,
            limit: None,
        }
    }

    #[must_use]
    pub const fn document(collection: Collection, id: RecordId) -> Self {
        Self {
            collection,
            document: Some(id),
            filter: None,
            order_by: None,
            limit: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filter = Some(Filter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check field names and limits before the query reaches a backend.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), QueryError> {
        if let Some(filter) = &self.filter {
            check_field(&filter.field)?;
            if !(filter.value.is_number() || filter.value.is_string() || filter.value.is_boolean())
            {
                return Err(QueryError::UnsupportedValue {
                    field: filter.field.clone(),
                });
            }
        }
        if let Some(order) = &self.order_by {
            check_field(&order.field)?;
        }
        if self.limit == Some(0) {
            return Err(QueryError::ZeroLimit);
        }
        if self.document.is_some() && (self.filter.is_some() || self.order_by.is_some()) {
            return Err(QueryError::DocumentWithFilter);
        }
        Ok(())
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.collection)?;
        if let Some(id) = &self.document {
            write!(f, "/{id}")?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " where {} {} {}", filter.field, filter.op.sql(), filter.value)?;
        }
        if let Some(order) = &self.order_by {
            let dir = match order.direction {
                Direction::Asc => "asc",
                Direction::Desc => "desc",
            };
            write!(f, " order by {} {dir}", order.field)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " limit {limit}")?;
        }
        Ok(())
    }
}

fn check_field(field: &str) -> Result<(), QueryError> {
    let valid = !field.is_empty()
        && !field.starts_with('.')
        && !field.ends_with('.')
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(QueryError::InvalidField {
            field: field.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid field name '{field}'")]
    InvalidField { field: String },

    #[error("filter on '{field}' must compare against a number, string or bool")]
    UnsupportedValue { field: String },

    #[error("limit must be greater than zero")]
    ZeroLimit,

    #[error("document subscriptions cannot carry a filter or ordering")]
    DocumentWithFilter,
}

impl QueryError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidQuery
    }
}

/// One delivery from a live query: the incremental change batch plus the
/// full result order after applying it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySnapshot {
    pub changes: Vec<ChangeEvent<Document>>,
    /// Identities of the full result set, in query order.
    pub order: Vec<RecordId>,
}

impl QuerySnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Error reported on a subscription's error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Snapshot(QuerySnapshot),
    Error(SourceError),
}

/// Receives deliveries for one subscription.
pub type Listener = Box<dyn FnMut(Delivery)>;

/// Scoped handle to a live subscription.
///
/// [`Subscription::cancel`] is idempotent and is also run on drop, so a
/// view that owns the handle is unsubscribed on every exit path.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
    label: String,
}

impl Subscription {
    pub fn new(label: impl Into<String>, cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
            label: label.into(),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            tracing::debug!(query = %self.label, "subscription cancelled");
            cancel();
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Push-based live queries.
pub trait LiveDataSource {
    /// Register a listener. The initial delivery (every current match as
    /// Added) may arrive before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the query is invalid or cannot be registered.
    fn subscribe(&self, query: QueryDescriptor, listener: Listener) -> Result<Subscription>;
}

/// Single-document reads.
pub trait PointLookup {
    /// # Errors
    ///
    /// Returns an error if the read fails. A missing document is `Ok(None)`.
    fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Document>>;
}

/// Field-level document mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Increment { field: String, delta: i64 },
    Set { field: String, value: Value },
}

impl FieldUpdate {
    #[must_use]
    pub fn increment(field: &str, delta: i64) -> Self {
        Self::Increment {
            field: field.to_string(),
            delta,
        }
    }

    #[must_use]
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        Self::Set {
            field: field.to_string(),
            value: value.into(),
        }
    }

    /// Apply to a document body. Incrementing a missing or non-integer
    /// field starts from 0.
    pub fn apply_to(&self, doc: &mut Document) {
        match self {
            Self::Increment { field, delta } => {
                let current = doc.get(field).and_then(Value::as_i64).unwrap_or(0);
                doc.insert(field.clone(), Value::from(current.saturating_add(*delta)));
            }
            Self::Set { field, value } => {
                doc.insert(field.clone(), value.clone());
            }
        }
    }
}

/// Writes to the live data source. Best-effort from the views' point of
/// view: callers log failures and move on.
pub trait MutationSink {
    /// Store a new document and return its identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn submit(&self, collection: Collection, doc: Document) -> Result<RecordId>;

    /// Apply field updates, creating the document if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn update(&self, collection: Collection, id: &RecordId, updates: &[FieldUpdate]) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn increment_field(
        &self,
        collection: Collection,
        id: &RecordId,
        field: &str,
        delta: i64,
    ) -> Result<()> {
        self.update(collection, id, &[FieldUpdate::increment(field, delta)])
    }

    /// Set every top-level field of `doc` on the stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn merge(&self, collection: Collection, id: &RecordId, doc: Document) -> Result<()> {
        let updates: Vec<FieldUpdate> = doc
            .into_iter()
            .map(|(field, value)| FieldUpdate::Set { field, value })
            .collect();
        self.update(collection, id, &updates)
    }
}

/// Everything a view needs from a backend.
pub trait Backend: LiveDataSource + PointLookup + MutationSink {}

impl<T: LiveDataSource + PointLookup + MutationSink> Backend for T {}
