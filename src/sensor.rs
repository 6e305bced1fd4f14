//! Sensor capability contract and the observation payload it produces.
//!
//! A sensor owns its own cadence. The scheduler only ever asks [`Sensor::is_due`]
//! and [`Sensor::observe`]; it never looks at how a sensor decides either.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Truth fields a sensor may sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    /// Air temperature in kelvin.
    Temperature,
    /// Pressure in pascal.
    Pressure,
    /// Eastward wind component in m/s.
    WindU,
    /// Northward wind component in m/s.
    WindV,
    /// Rain water mixing ratio in kg/kg.
    RainMixingRatio,
}

/// A point in the simulation domain, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GridPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl GridPoint {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Read-only view of the simulated atmosphere.
///
/// Implemented by the surrounding simulation. Returns `None` when a field is
/// not available at the requested point (outside the grid, not simulated).
pub trait TruthState {
    fn sample(&self, field: Field, point: GridPoint) -> Option<f64>;
}

/// Everything a sensor may look at while observing one tick.
#[derive(Clone, Copy)]
pub struct ObservationContext<'a> {
    pub truth: &'a dyn TruthState,
    pub sim_time_seconds: f64,
}

impl<'a> ObservationContext<'a> {
    pub fn new(truth: &'a dyn TruthState, sim_time_seconds: f64) -> Self {
        Self {
            truth,
            sim_time_seconds,
        }
    }
}

impl std::fmt::Debug for ObservationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationContext")
            .field("sim_time_seconds", &self.sim_time_seconds)
            .finish_non_exhaustive()
    }
}

/// The result of one sensor firing once.
///
/// Immutable once handed to the scheduler, which shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationSet {
    pub sensor_id: String,
    pub sim_time_seconds: f64,
    pub kind: String,
    pub data: Value,
}

impl ObservationSet {
    pub fn new(
        sensor_id: impl Into<String>,
        sim_time_seconds: f64,
        kind: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            sim_time_seconds,
            kind: kind.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("truth field {0:?} unavailable at sample point")]
    FieldUnavailable(Field),
    #[error("sensor misconfigured: {0}")]
    Misconfigured(String),
    #[error("observation failed: {0}")]
    Failed(String),
    #[error("sensor panicked: {0}")]
    Panicked(String),
}

/// Capability every scheduled sensor provides.
pub trait Sensor: Send {
    /// Stable identity. Duplicates are allowed; the latest-observation table
    /// is keyed by this value.
    fn id(&self) -> &str;

    /// Whether the sensor wants to fire at `sim_time_seconds`.
    fn is_due(&self, sim_time_seconds: f64) -> Result<bool, SensorError>;

    /// Produce an observation, or `None` when nothing was observed this tick.
    fn observe(
        &mut self,
        ctx: &ObservationContext<'_>,
    ) -> Result<Option<ObservationSet>, SensorError>;

    /// Record that an observation was accepted at `sim_time_seconds`.
    fn mark_observed(&mut self, _sim_time_seconds: f64) {}
}
