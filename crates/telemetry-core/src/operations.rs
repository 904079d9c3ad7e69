//! The operations exposed by the telemetry server.
//!
//! `last` returns the recent history, `newData` streams readings as they are
//! stored, and `createData` stores one reading.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::models::{DataPoint, Operation};

/// Root field of the history query response.
pub const HISTORY_FIELD: &str = "last";

/// Root field of every live subscription payload.
pub const LIVE_FIELD: &str = "newData";

/// Root field of the store mutation response.
pub const CREATE_FIELD: &str = "createData";

const HISTORY_DOCUMENT: &str = "query data {
  last {
    timestamp
    value
    deviceId
  }
}";

const LIVE_DOCUMENT: &str = "subscription onNewData($input: NewDataInput!) {
  newData(input: $input) {
    timestamp
    value
    deviceId
  }
}";

const CREATE_DOCUMENT: &str = "mutation createData($input: CreateDataInput!) {
  createData(input: $input) {
    timestamp
    value
    deviceId
  }
}";

/// Fetch the recent history used to seed a view.
pub fn history_query() -> Operation {
    Operation::query("data", HISTORY_DOCUMENT)
}

/// Subscribe to readings stored from `start` onwards.
///
/// The start point travels once, in the subscribe message, as epoch seconds.
pub fn live_subscription(start: DateTime<Utc>) -> Operation {
    Operation::subscription("onNewData", LIVE_DOCUMENT)
        .with_input("input", json!({ "timestamp": start.timestamp() }))
}

/// Store one reading.
pub fn create_data(point: &DataPoint) -> Operation {
    Operation::mutation("createData", CREATE_DOCUMENT).with_input(
        "input",
        json!({
            "timestamp": point.timestamp.timestamp(),
            "value": point.value,
            "deviceId": point.source_id,
        }),
    )
}
