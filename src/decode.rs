//! JSON snapshot decoder.

use crate::types::{AircraftRecord, Snapshot};
use serde_json::Value;
use thiserror::Error;

/// Top-level field holding the aircraft list.
pub const AIRCRAFT_LIST_FIELD: &str = "acList";
/// Top-level field holding the server time in epoch milliseconds.
pub const SERVER_TIME_FIELD: &str = "stm";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Document is not a JSON object")]
    NotAnObject,
    #[error("Missing aircraft list field `acList`")]
    MissingAircraftList,
    #[error("Aircraft list field `acList` is not an array")]
    AircraftListNotArray,
    #[error("Aircraft list entry {index} is not an object")]
    RecordNotObject { index: usize },
}

/// Decode one member's text into a snapshot. The timestamp is left unset;
/// it comes from the member name, not the content.
pub fn decode(text: &str) -> Result<Snapshot, DecodeError> {
    let document: Value = serde_json::from_str(text)?;
    let Value::Object(mut document) = document else {
        return Err(DecodeError::NotAnObject);
    };

    let list = match document.remove(AIRCRAFT_LIST_FIELD) {
        Some(Value::Array(list)) => list,
        Some(_) => return Err(DecodeError::AircraftListNotArray),
        None => return Err(DecodeError::MissingAircraftList),
    };

    let records = list
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::Object(fields) => Ok(AircraftRecord::new(fields)),
            _ => Err(DecodeError::RecordNotObject { index }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let server_time_ms = document.get(SERVER_TIME_FIELD).and_then(Value::as_i64);

    Ok(Snapshot {
        timestamp: None,
        server_time_ms,
        records,
    })
}
