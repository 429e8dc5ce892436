//! Core data types for archived aircraft snapshots.

use chrono::NaiveTime;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Field carrying latitude in degrees.
pub const LATITUDE_FIELD: &str = "Lat";
/// Field carrying longitude in degrees.
pub const LONGITUDE_FIELD: &str = "Long";
/// Field carrying the ICAO 24-bit hex address.
pub const ICAO_FIELD: &str = "Icao";

/// One aircraft entry from a snapshot's aircraft list.
///
/// Fields are kept exactly as the archive supplied them. Lookups through
/// [`AircraftRecord::get`] ignore case, since field spelling drifts between
/// archive versions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AircraftRecord(Map<String, Value>);

impl AircraftRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Case-insensitive field lookup. An exact match is preferred.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(field))
                .map(|(_, v)| v)
        })
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn latitude(&self) -> Option<f64> {
        self.get(LATITUDE_FIELD).and_then(as_degrees)
    }

    pub fn longitude(&self) -> Option<f64> {
        self.get(LONGITUDE_FIELD).and_then(as_degrees)
    }

    /// Latitude/longitude pair, if both are present and numeric.
    pub fn position(&self) -> Option<GeoPoint> {
        Some(GeoPoint::new(self.latitude()?, self.longitude()?))
    }

    pub fn icao(&self) -> Option<&str> {
        self.get(ICAO_FIELD).and_then(Value::as_str)
    }
}

fn as_degrees(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A point on the globe, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.lat, self.lon)
    }
}

/// One decoded archive member.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Time of day parsed from the member name; `None` until attached.
    pub timestamp: Option<NaiveTime>,
    /// Server time (`stm`, epoch milliseconds) when the document carries it.
    pub server_time_ms: Option<i64>,
    pub records: Vec<AircraftRecord>,
}

impl Snapshot {
    pub fn with_timestamp(mut self, timestamp: NaiveTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// An aircraft record that survived the search filters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sighting {
    #[serde(flatten)]
    pub record: AircraftRecord,
    /// Great-circle distance from the search center, `None` without a position.
    pub distance: Option<f64>,
    pub timestamp: NaiveTime,
    /// Server time (`stm`) of the snapshot the record came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_time_ms: Option<i64>,
}
