//! Change events and the JSONL change-feed format.
//!
//! A change feed is one JSON object per line:
//!
//! ```text
//! # comment
//! {"kind":"added","id":"a1","payload":{"congestionLevel":40, ...}}
//! {"kind":"removed","id":"a1"}
//! ---
//! {"kind":"modified","id":"b7","payload":{...}}
//! ```
//!
//! `---` closes the current batch. Blank lines and `#` comments are ignored.
//! Events keep the order they appear in; batches keep the order they are
//! delimited in.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ErrorCode;
use crate::model::{Document, Payload, PayloadError, RecordId};

/// Batch separator line.
pub const BATCH_SEPARATOR: &str = "---";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one identity. Removals carry no payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<P> {
    Added(P),
    Modified(P),
    Removed,
}

/// One entry of a change batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<P> {
    pub id: RecordId,
    pub change: Change<P>,
}

impl<P> ChangeEvent<P> {
    pub fn added(id: impl Into<RecordId>, payload: P) -> Self {
        Self {
            id: id.into(),
            change: Change::Added(payload),
        }
    }

    pub fn modified(id: impl Into<RecordId>, payload: P) -> Self {
        Self {
            id: id.into(),
            change: Change::Modified(payload),
        }
    }

    pub fn removed(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            change: Change::Removed,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self.change {
            Change::Added(_) => ChangeKind::Added,
            Change::Modified(_) => ChangeKind::Modified,
            Change::Removed => ChangeKind::Removed,
        }
    }

    #[must_use]
    pub const fn payload(&self) -> Option<&P> {
        match &self.change {
            Change::Added(p) | Change::Modified(p) => Some(p),
            Change::Removed => None,
        }
    }

    /// Convert the payload, keeping identity and kind.
    ///
    /// # Errors
    ///
    /// Propagates the first conversion error.
    pub fn try_map<Q, E>(self, f: impl FnOnce(P) -> Result<Q, E>) -> Result<ChangeEvent<Q>, E> {
        let change = match self.change {
            Change::Added(p) => Change::Added(f(p)?),
            Change::Modified(p) => Change::Modified(f(p)?),
            Change::Removed => Change::Removed,
        };
        Ok(ChangeEvent {
            id: self.id,
            change,
        })
    }
}

impl ChangeEvent<Document> {
    /// Decode the document payload into a typed schema.
    ///
    /// # Errors
    ///
    /// Returns the payload's schema error.
    pub fn decode<P: Payload>(self) -> Result<ChangeEvent<P>, PayloadError> {
        self.try_map(|doc| P::decode(&doc))
    }
}

/// Wire shape of one feed line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireChange {
    pub kind: ChangeKind,
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl WireChange {
    /// # Errors
    ///
    /// Returns an error when an added/modified line lacks an object payload.
    pub fn into_event(self) -> Result<ChangeEvent<Document>, FeedError> {
        let payload = match (self.kind, self.payload) {
            (ChangeKind::Removed, _) => return Ok(ChangeEvent::removed(self.id)),
            (kind, None) => return Err(FeedError::MissingPayload { kind, id: self.id }),
            (_, Some(Value::Object(map))) => map,
            (_, Some(_)) => return Err(FeedError::PayloadNotObject { id: self.id }),
        };
        Ok(match self.kind {
            ChangeKind::Added => ChangeEvent::added(self.id, payload),
            ChangeKind::Modified | ChangeKind::Removed => ChangeEvent::modified(self.id, payload),
        })
    }
}

impl From<&ChangeEvent<Document>> for WireChange {
    fn from(event: &ChangeEvent<Document>) -> Self {
        Self {
            kind: event.kind(),
            id: event.id.clone(),
            payload: event.payload().cloned().map(Value::Object),
        }
    }
}

/// Errors produced while reading a change feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} event for '{id}' has no payload")]
    MissingPayload { kind: ChangeKind, id: RecordId },

    #[error("payload for '{id}' is not a JSON object")]
    PayloadNotObject { id: RecordId },
}

impl FeedError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidFeed
    }
}

/// One classified line of a feed file.
#[derive(Debug)]
pub enum FeedLine {
    Event(ChangeEvent<Document>),
    Separator,
    Comment,
    Blank,
}

/// Classify and parse a single feed line.
///
/// # Errors
///
/// Returns [`FeedError`] for malformed event lines.
pub fn parse_line(line: &str) -> Result<FeedLine, FeedError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(FeedLine::Blank);
    }
    if trimmed.starts_with('#') {
        return Ok(FeedLine::Comment);
    }
    if trimmed == BATCH_SEPARATOR {
        return Ok(FeedLine::Separator);
    }
    let wire: WireChange = serde_json::from_str(trimmed)?;
    Ok(FeedLine::Event(wire.into_event()?))
}

/// Parse a whole feed into batches.
///
/// Empty batches (consecutive separators) are dropped.
///
/// # Errors
///
/// Returns the 1-based line number and error of the first malformed line.
pub fn parse_feed(input: &str) -> Result<Vec<Vec<ChangeEvent<Document>>>, (usize, FeedError)> {
    let mut batches = Vec::new();
    let mut current = Vec::new();

    for (i, line) in input.lines().enumerate() {
        match parse_line(line).map_err(|e| (i + 1, e))? {
            FeedLine::Event(event) => current.push(event),
            FeedLine::Separator => {
                if !current.is_empty() {
                    batches.push(std::mem::take(&mut current));
                }
            }
            FeedLine::Comment | FeedLine::Blank => {}
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    Ok(batches)
}

/// Render batches back into feed text.
///
/// # Errors
///
/// Returns an error if a payload cannot be serialized.
pub fn write_feed(batches: &[Vec<ChangeEvent<Document>>]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for (i, batch) in batches.iter().enumerate() {
        if i > 0 {
            out.push_str(BATCH_SEPARATOR);
            out.push('\n');
        }
        for event in batch {
            out.push_str(&serde_json::to_string(&WireChange::from(event))?);
            out.push('\n');
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrafficSample;
    use serde_json::json;

    const SAMPLE: &str = r#"# two batches
{"kind":"added","id":"a","payload":{"coordinates":{"latitude":1.0,"longitude":2.0},"congestionLevel":30}}
{"kind":"added","id":"b","payload":{"coordinates":{"latitude":1.0,"longitude":2.0}}}

---
{"kind":"modified","id":"a","payload":{"coordinates":{"latitude":1.0,"longitude":2.0},"congestionLevel":90}}
{"kind":"removed","id":"b"}
"#;

    #[test]
    fn parses_batches_and_skips_comments() {
        let batches = parse_feed(SAMPLE).expect("parse");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1][0].kind(), ChangeKind::Modified);
        assert_eq!(batches[1][1], ChangeEvent::removed("b"));
    }

    #[test]
    fn error_reports_line_number() {
        let input = "{\"kind\":\"removed\",\"id\":\"x\"}\n{not json}\n";
        let (line, err) = parse_feed(input).expect_err("bad line");
        assert_eq!(line, 2);
        assert!(matches!(err, FeedError::Json(_)));
        assert_eq!(err.code(), ErrorCode::InvalidFeed);
    }

    #[test]
    fn added_without_payload_is_rejected() {
        let err = parse_line(r#"{"kind":"added","id":"x"}"#).expect_err("no payload");
        assert!(matches!(
            err,
            FeedError::MissingPayload {
                kind: ChangeKind::Added,
                ..
            }
        ));
    }

    #[test]
    fn removed_ignores_stray_payload() {
        let line = parse_line(r#"{"kind":"removed","id":"x","payload":{"a":1}}"#).expect("parse");
        let FeedLine::Event(event) = line else {
            panic!("expected event");
        };
        assert!(event.payload().is_none());
    }

    #[test]
    fn consecutive_separators_do_not_make_empty_batches() {
        let input = "---\n---\n{\"kind\":\"removed\",\"id\":\"x\"}\n---\n---\n";
        let batches = parse_feed(input).expect("parse");
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn decode_converts_payload_type() {
        let event = ChangeEvent::added(
            "a",
            json!({"coordinates": {"latitude": 0.0, "longitude": 0.0}, "congestionLevel": 12})
                .as_object()
                .cloned()
                .expect("object"),
        );
        let typed = event.decode::<TrafficSample>().expect("decode");
        assert_eq!(typed.payload().map(|s| s.congestion_level), Some(12));
    }

    #[test]
    fn written_feed_parses_back() {
        let batches = parse_feed(SAMPLE).expect("parse");
        let text = write_feed(&batches).expect("write");
        assert_eq!(parse_feed(&text).expect("reparse"), batches);
    }
}
