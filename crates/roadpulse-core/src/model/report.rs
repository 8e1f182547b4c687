use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

use super::traffic::Coordinates;
use super::{Payload, PayloadError, RecordKind, default_anonymous, lenient};

/// Category a citizen picks when filing a report.
///
/// Unknown, missing or non-string categories read as [`ReportType::Other`]
/// when decoding a [`Report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReportType {
    Accident,
    Pothole,
    Roadblock,
    Flooding,
    #[default]
    #[serde(other)]
    Other,
}

impl ReportType {
    /// Display order used by the report-type chart.
    pub const ALL: [Self; 5] = [
        Self::Accident,
        Self::Pothole,
        Self::Roadblock,
        Self::Flooding,
        Self::Other,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accident => "Accident",
            Self::Pothole => "Pothole",
            Self::Roadblock => "Roadblock",
            Self::Flooding => "Flooding",
            Self::Other => "Other",
        }
    }

    /// Chart color for this category.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Accident => "#EF4444",
            Self::Pothole => "#F59E0B",
            Self::Roadblock => "#3B82F6",
            Self::Flooding => "#10B981",
            Self::Other => "#6B7280",
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Accident => 0,
            Self::Pothole => 1,
            Self::Roadblock => 2,
            Self::Flooding => 3,
            Self::Other => 4,
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown report type string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown report type '{raw}': expected one of Accident, Pothole, Roadblock, Flooding, Other")]
pub struct UnknownReportType {
    pub raw: String,
}

impl ReportType {
    fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::String(raw)) => raw.parse().unwrap_or_default(),
            _ => Self::Other,
        })
    }
}

impl FromStr for ReportType {
    type Err = UnknownReportType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownReportType { raw: s.to_string() })
    }
}

/// Moderation state of a report. New reports start out pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

/// A citizen-filed incident report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[serde(
        default,
        rename = "type",
        deserialize_with = "ReportType::deserialize_lenient"
    )]
    pub report_type: ReportType,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub description: String,
    /// Free-form address text shown next to the pin.
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub location: String,
    pub coordinates: Coordinates,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::whole")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub status: ReportStatus,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_anonymous", deserialize_with = "lenient::name")]
    pub user_name: String,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub karma_awarded: bool,
    #[serde(default, deserialize_with = "lenient::whole")]
    pub upvotes: u32,
    #[serde(default, deserialize_with = "lenient::whole")]
    pub downvotes: u32,
}

impl Payload for Report {
    const KIND: RecordKind = RecordKind::Report;

    fn validate(&self) -> Result<(), PayloadError> {
        self.coordinates.validate(Self::KIND)
    }
}
