use super::Cadence;
use crate::sensor::{Field, GridPoint, ObservationContext, ObservationSet, Sensor, SensorError};
use serde_json::json;

/// Surface weather station reporting temperature, pressure and wind.
#[derive(Debug, Clone)]
pub struct StationSensor {
    id: String,
    location: GridPoint,
    cadence: Cadence,
}

impl StationSensor {
    pub fn new(id: impl Into<String>, location: GridPoint, interval_seconds: f64) -> Self {
        Self {
            id: id.into(),
            location,
            cadence: Cadence::new(interval_seconds),
        }
    }

    pub fn with_start(mut self, start_seconds: f64) -> Self {
        self.cadence = self.cadence.with_start(start_seconds);
        self
    }

    pub fn location(&self) -> GridPoint {
        self.location
    }

    fn sample(&self, ctx: &ObservationContext<'_>, field: Field) -> Result<f64, SensorError> {
        ctx.truth
            .sample(field, self.location)
            .filter(|value| value.is_finite())
            .ok_or(SensorError::FieldUnavailable(field))
    }
}

/// Meteorological wind direction (degrees the wind blows from, clockwise from north).
pub fn wind_direction_deg(u: f64, v: f64) -> f64 {
    if u == 0.0 && v == 0.0 {
        return 0.0;
    }
    (270.0 - v.atan2(u).to_degrees()).rem_euclid(360.0)
}

impl Sensor for StationSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_due(&self, sim_time_seconds: f64) -> Result<bool, SensorError> {
        Ok(self.cadence.is_due(sim_time_seconds))
    }

    fn observe(
        &mut self,
        ctx: &ObservationContext<'_>,
    ) -> Result<Option<ObservationSet>, SensorError> {
        let temperature = self.sample(ctx, Field::Temperature)?;
        let pressure = self.sample(ctx, Field::Pressure)?;
        let u = self.sample(ctx, Field::WindU)?;
        let v = self.sample(ctx, Field::WindV)?;

        Ok(Some(ObservationSet::new(
            self.id.clone(),
            ctx.sim_time_seconds,
            "station",
            json!({
                "temperatureK": temperature,
                "pressurePa": pressure,
                "windSpeed": u.hypot(v),
                "windDirDeg": wind_direction_deg(u, v),
            }),
        )))
    }

    fn mark_observed(&mut self, sim_time_seconds: f64) {
        self.cadence.mark(sim_time_seconds);
    }
}
