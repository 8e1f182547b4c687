use serde::{Deserialize, Serialize};

use super::{Payload, PayloadError, RecordKind, lenient};

/// Highest valid congestion percentage.
pub const MAX_CONGESTION: u8 = 100;

/// WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub(crate) fn validate(self, kind: RecordKind) -> Result<(), PayloadError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(PayloadError::OutOfRange {
                kind,
                field: "coordinates.latitude",
                detail: format!("{} not in [-90, 90]", self.latitude),
            });
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(PayloadError::OutOfRange {
                kind,
                field: "coordinates.longitude",
                detail: format!("{} not in [-180, 180]", self.longitude),
            });
        }
        Ok(())
    }
}

/// One live traffic observation shown as a map marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSample {
    pub coordinates: Coordinates,
    #[serde(default, deserialize_with = "lenient::whole")]
    pub congestion_level: u8,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub incident_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Observation time, microseconds since the Unix epoch.
    #[serde(default, deserialize_with = "lenient::whole")]
    pub timestamp: i64,
}

impl TrafficSample {
    /// Popup title; untitled samples read as a generic incident.
    #[must_use]
    pub fn title(&self) -> &str {
        self.incident_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or("Traffic Incident")
    }

    #[must_use]
    pub fn description_or_default(&self) -> &str {
        self.description
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or("No description")
    }
}

impl Payload for TrafficSample {
    const KIND: RecordKind = RecordKind::TrafficSample;

    fn validate(&self) -> Result<(), PayloadError> {
        self.coordinates.validate(Self::KIND)?;
        check_level(Self::KIND, self.congestion_level)
    }
}

/// Historical congestion reading used by the hourly dashboard chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficStat {
    #[serde(default, deserialize_with = "lenient::whole")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "lenient::whole")]
    pub congestion_level: u8,
}

impl Payload for TrafficStat {
    const KIND: RecordKind = RecordKind::TrafficStat;

    fn validate(&self) -> Result<(), PayloadError> {
        check_level(Self::KIND, self.congestion_level)
    }
}

fn check_level(kind: RecordKind, level: u8) -> Result<(), PayloadError> {
    if level > MAX_CONGESTION {
        return Err(PayloadError::OutOfRange {
            kind,
            field: "congestionLevel",
            detail: format!("{level} exceeds {MAX_CONGESTION}"),
        });
    }
    Ok(())
}

/// Coarse severity used to color markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionBand {
    Light,
    Moderate,
    Heavy,
}

impl CongestionBand {
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Light => "green",
            Self::Moderate => "orange",
            Self::Heavy => "red",
        }
    }
}

/// Strict lower bounds for the moderate and heavy bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CongestionThresholds {
    pub heavy: u8,
    pub moderate: u8,
}

impl Default for CongestionThresholds {
    fn default() -> Self {
        Self {
            heavy: 70,
            moderate: 40,
        }
    }
}

impl CongestionThresholds {
    #[must_use]
    pub const fn band(self, level: u8) -> CongestionBand {
        if level > self.heavy {
            CongestionBand::Heavy
        } else if level > self.moderate {
            CongestionBand::Moderate
        } else {
            CongestionBand::Light
        }
    }
}
