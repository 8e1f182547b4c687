//! Typed payload schemas for every record kind the views consume.
//!
//! The live data source hands out untyped JSON documents. Each view decodes
//! them into one of the schemas below through [`Payload::decode`], which
//! applies field defaults (a missing or `null` `karmaPoints` is 0, a missing
//! `userName` is "Anonymous", ...) and range checks. Decode failures are
//! reported as [`PayloadError`] and never reach a render sink.

pub mod karma;
mod lenient;
pub mod report;
pub mod traffic;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;
use crate::source::Collection;

pub use karma::{Achievement, LeaderboardEntry, UserKarma};
pub use report::{Report, ReportStatus, ReportType};
pub use traffic::{CongestionBand, Coordinates, TrafficSample, TrafficStat};

/// Untyped document body as stored by the live data source.
pub type Document = serde_json::Map<String, Value>;

/// Opaque record identity (the document id). The single key of every
/// projection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for RecordId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The record kinds exchanged with the live data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Report,
    TrafficSample,
    TrafficStat,
    UserKarma,
    LeaderboardEntry,
}

impl RecordKind {
    /// Collection the kind lives in.
    #[must_use]
    pub const fn collection(self) -> Collection {
        match self {
            Self::Report => Collection::Reports,
            Self::TrafficSample => Collection::TrafficData,
            Self::TrafficStat => Collection::TrafficStats,
            Self::UserKarma => Collection::Users,
            Self::LeaderboardEntry => Collection::Leaderboard,
        }
    }

    /// Schema of the documents stored in a collection.
    #[must_use]
    pub const fn for_collection(collection: Collection) -> Self {
        match collection {
            Collection::Reports => Self::Report,
            Collection::TrafficData => Self::TrafficSample,
            Collection::TrafficStats => Self::TrafficStat,
            Collection::Users => Self::UserKarma,
            Collection::Leaderboard => Self::LeaderboardEntry,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::TrafficSample => "traffic_sample",
            Self::TrafficStat => "traffic_stat",
            Self::UserKarma => "user_karma",
            Self::LeaderboardEntry => "leaderboard_entry",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to turn a document into a typed payload (or back).
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("{kind} document does not match schema: {source}")]
    Schema {
        kind: RecordKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} field `{field}` out of range: {detail}")]
    OutOfRange {
        kind: RecordKind,
        field: &'static str,
        detail: String,
    },

    #[error("{kind} payload did not serialize to a JSON object")]
    NotAnObject { kind: RecordKind },
}

impl PayloadError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidPayload
    }
}

/// A typed record schema.
pub trait Payload: Serialize + DeserializeOwned + Clone {
    const KIND: RecordKind;

    /// Range and consistency checks that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::OutOfRange`] for values outside the schema.
    fn validate(&self) -> Result<(), PayloadError> {
        Ok(())
    }

    /// Decode a document, applying field defaults and validation.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing, have the wrong
    /// type, or fail [`Payload::validate`].
    fn decode(doc: &Document) -> Result<Self, PayloadError> {
        let value: Self = serde_json::from_value(Value::Object(doc.clone())).map_err(|source| {
            PayloadError::Schema {
                kind: Self::KIND,
                source,
            }
        })?;
        value.validate()?;
        Ok(value)
    }

    /// Encode into a document body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or does not yield an object.
    fn to_document(&self) -> Result<Document, PayloadError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(PayloadError::NotAnObject { kind: Self::KIND }),
            Err(source) => Err(PayloadError::Schema {
                kind: Self::KIND,
                source,
            }),
        }
    }
}

/// A decoded record of any kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Record {
    Report(Report),
    TrafficSample(TrafficSample),
    TrafficStat(TrafficStat),
    UserKarma(UserKarma),
    LeaderboardEntry(LeaderboardEntry),
}

impl Record {
    /// Decode a document according to the given kind.
    ///
    /// # Errors
    ///
    /// Returns the schema error of the selected kind.
    pub fn decode(kind: RecordKind, doc: &Document) -> Result<Self, PayloadError> {
        Ok(match kind {
            RecordKind::Report => Self::Report(Report::decode(doc)?),
            RecordKind::TrafficSample => Self::TrafficSample(TrafficSample::decode(doc)?),
            RecordKind::TrafficStat => Self::TrafficStat(TrafficStat::decode(doc)?),
            RecordKind::UserKarma => Self::UserKarma(UserKarma::decode(doc)?),
            RecordKind::LeaderboardEntry => {
                Self::LeaderboardEntry(LeaderboardEntry::decode(doc)?)
            }
        })
    }

    /// The traffic sample carried by this record, if it is one.
    #[must_use]
    pub fn into_traffic_sample(self) -> Option<TrafficSample> {
        match self {
            Self::TrafficSample(sample) => Some(sample),
            _ => None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::Report(_) => RecordKind::Report,
            Self::TrafficSample(_) => RecordKind::TrafficSample,
            Self::TrafficStat(_) => RecordKind::TrafficStat,
            Self::UserKarma(_) => RecordKind::UserKarma,
            Self::LeaderboardEntry(_) => RecordKind::LeaderboardEntry,
        }
    }
}

pub(crate) fn default_anonymous() -> String {
    "Anonymous".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn record_decode_dispatches_on_kind() {
        let body = doc(json!({"karmaPoints": 40}));
        let record = Record::decode(RecordKind::UserKarma, &body).expect("decode");
        assert_eq!(record.kind(), RecordKind::UserKarma);
        let Record::UserKarma(karma) = record else {
            panic!("wrong variant");
        };
        assert_eq!(karma.karma_points, 40);
    }

    #[test]
    fn missing_required_field_is_schema_error() {
        let body = doc(json!({"congestionLevel": 20}));
        let err = Record::decode(RecordKind::TrafficSample, &body).expect_err("no coordinates");
        assert!(matches!(err, PayloadError::Schema { kind: RecordKind::TrafficSample, .. }));
        assert_eq!(err.code(), ErrorCode::InvalidPayload);
    }

    #[test]
    fn record_serializes_with_kind_tag() {
        let record = Record::UserKarma(UserKarma::default());
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["kind"], "user_karma");
        assert_eq!(json["payload"]["karmaPoints"], 0);
    }

    #[test]
    fn kinds_map_to_collections() {
        assert_eq!(RecordKind::TrafficSample.collection(), Collection::TrafficData);
        assert_eq!(RecordKind::LeaderboardEntry.collection(), Collection::Leaderboard);
        for collection in Collection::ALL {
            assert_eq!(RecordKind::for_collection(collection).collection(), collection);
        }
    }

    #[test]
    fn only_traffic_records_yield_samples() {
        let body = doc(json!({"coordinates": {"latitude": 1.0, "longitude": 2.0}}));
        let sample = Record::decode(RecordKind::TrafficSample, &body).expect("decode");
        assert!(sample.into_traffic_sample().is_some());
        let report = Record::decode(RecordKind::Report, &body).expect("decode");
        assert!(report.into_traffic_sample().is_none());
    }

    #[test]
    fn record_id_is_transparent_in_json() {
        let id = RecordId::from("abc");
        assert_eq!(serde_json::to_string(&id).expect("ser"), "\"abc\"");
        assert_eq!(id.to_string(), "abc");
    }
}
