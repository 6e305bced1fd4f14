//! Default line serializer for observations.

use crate::sensor::ObservationSet;
use serde::Serialize;
use serde_json::Value;

pub const OBSERVATION_RECORD_TYPE: &str = "observation";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ObservationRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<&'a str>,
    sensor: &'a str,
    t: f64,
    kind: &'a str,
    data: &'a Value,
}

/// Serialize one observation as a single JSON line (no trailing newline).
pub fn observation_line(
    observation: &ObservationSet,
    run_id: Option<&str>,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ObservationRecord {
        record_type: OBSERVATION_RECORD_TYPE,
        run_id,
        sensor: &observation.sensor_id,
        t: observation.sim_time_seconds,
        kind: &observation.kind,
        data: &observation.data,
    })
}
