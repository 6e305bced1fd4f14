use super::Cadence;
use crate::sensor::{Field, GridPoint, ObservationContext, ObservationSet, Sensor, SensorError};
use arrayvec::ArrayVec;
use serde_json::json;

pub const MAX_GATES: usize = 64;
const DEFAULT_GATE_COUNT: usize = 32;
const DEFAULT_GATE_SPACING_M: f64 = 1000.0;
const DEFAULT_ELEVATION_DEG: f64 = 0.5;

// Reflectivity floor/ceiling in dBZ
const MIN_DBZ: f64 = -10.0;
const MAX_DBZ: f64 = 75.0;
const AIR_DENSITY_KG_M3: f64 = 1.2;
const MIN_RAIN_MIXING_RATIO: f64 = 1.0e-8;

/// Single-ray scanning radar sampling rain water along its range gates.
#[derive(Debug, Clone)]
pub struct RadarSensor {
    id: String,
    site: GridPoint,
    azimuth_deg: f64,
    elevation_deg: f64,
    gate_count: usize,
    gate_spacing_m: f64,
    cadence: Cadence,
}

impl RadarSensor {
    pub fn new(id: impl Into<String>, site: GridPoint, interval_seconds: f64) -> Self {
        Self {
            id: id.into(),
            site,
            azimuth_deg: 0.0,
            elevation_deg: DEFAULT_ELEVATION_DEG,
            gate_count: DEFAULT_GATE_COUNT,
            gate_spacing_m: DEFAULT_GATE_SPACING_M,
            cadence: Cadence::new(interval_seconds),
        }
    }

    pub fn with_azimuth(mut self, azimuth_deg: f64) -> Self {
        self.azimuth_deg = azimuth_deg.rem_euclid(360.0);
        self
    }

    pub fn with_elevation(mut self, elevation_deg: f64) -> Self {
        self.elevation_deg = elevation_deg.clamp(0.0, 89.0);
        self
    }

    /// Gate count is clamped to `1..=MAX_GATES`.
    pub fn with_gates(mut self, gate_count: usize, gate_spacing_m: f64) -> Self {
        self.gate_count = gate_count.clamp(1, MAX_GATES);
        self.gate_spacing_m = gate_spacing_m;
        self
    }

    pub fn with_start(mut self, start_seconds: f64) -> Self {
        self.cadence = self.cadence.with_start(start_seconds);
        self
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    fn gate_point(&self, gate: usize) -> GridPoint {
        let range_m = (gate as f64 + 0.5) * self.gate_spacing_m;
        let azimuth = self.azimuth_deg.to_radians();
        let elevation = self.elevation_deg.to_radians();
        let ground_range = range_m * elevation.cos();

        // Azimuth is clockwise from north
        GridPoint::new(
            self.site.x + ground_range * azimuth.sin(),
            self.site.y + ground_range * azimuth.cos(),
            self.site.z + range_m * elevation.sin(),
        )
    }
}

/// Rain-only reflectivity from mixing ratio.
pub fn reflectivity_dbz(rain_mixing_ratio: f64) -> f64 {
    if rain_mixing_ratio <= MIN_RAIN_MIXING_RATIO {
        return MIN_DBZ;
    }
    let rain_content_g_m3 = AIR_DENSITY_KG_M3 * rain_mixing_ratio * 1000.0;
    (43.1 + 17.5 * rain_content_g_m3.log10()).clamp(MIN_DBZ, MAX_DBZ)
}

impl Sensor for RadarSensor {
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
        if !self.gate_spacing_m.is_finite() || self.gate_spacing_m <= 0.0 {
            return Err(SensorError::Misconfigured(format!(
                "gate spacing must be positive, got {}",
                self.gate_spacing_m
            )));
        }

        let mut qr: ArrayVec<f64, MAX_GATES> = ArrayVec::new();
        let mut dbz: ArrayVec<f64, MAX_GATES> = ArrayVec::new();

        for gate in 0..self.gate_count {
            let value = ctx
                .truth
                .sample(Field::RainMixingRatio, self.gate_point(gate))
                .ok_or(SensorError::FieldUnavailable(Field::RainMixingRatio))?
                .max(0.0);
            qr.push(value);
            dbz.push(reflectivity_dbz(value));
        }

        Ok(Some(ObservationSet::new(
            self.id.clone(),
            ctx.sim_time_seconds,
            "radar",
            json!({
                "azimuthDeg": self.azimuth_deg,
                "elevationDeg": self.elevation_deg,
                "gateSpacingM": self.gate_spacing_m,
                "qr": qr.as_slice(),
                "dbz": dbz.as_slice(),
            }),
        )))
    }

    fn mark_observed(&mut self, sim_time_seconds: f64) {
        self.cadence.mark(sim_time_seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::TruthState;

    struct UniformRain(f64);

    impl TruthState for UniformRain {
        fn sample(&self, field: Field, _point: GridPoint) -> Option<f64> {
            match field {
                Field::RainMixingRatio => Some(self.0),
                _ => None,
            }
        }
    }

    #[test]
    fn test_dry_air_hits_floor() {
        assert_eq!(reflectivity_dbz(0.0), MIN_DBZ);
        assert_eq!(reflectivity_dbz(-1.0), MIN_DBZ);
    }

    #[test]
    fn test_reflectivity_increases_with_rain() {
        let light = reflectivity_dbz(1.0e-4);
        let heavy = reflectivity_dbz(3.0e-3);
        assert!(heavy > light);
        assert!(heavy <= MAX_DBZ);
    }

    #[test]
    fn test_observe_samples_every_gate() {
        let truth = UniformRain(1.0e-3);
        let mut radar = RadarSensor::new("radar-1", GridPoint::default(), 60.0).with_gates(8, 500.0);
        let ctx = ObservationContext::new(&truth, 120.0);

        let set = radar.observe(&ctx).unwrap().unwrap();
        assert_eq!(set.sensor_id, "radar-1");
        assert_eq!(set.kind, "radar");
        assert_eq!(set.sim_time_seconds, 120.0);
        assert_eq!(set.data["qr"].as_array().unwrap().len(), 8);
        assert_eq!(set.data["dbz"].as_array().unwrap().len(), 8);
    }

    #[test]
    fn test_gate_count_clamped() {
        let radar = RadarSensor::new("r", GridPoint::default(), 1.0).with_gates(1000, 100.0);
        assert_eq!(radar.gate_count, MAX_GATES);

        let radar = RadarSensor::new("r", GridPoint::default(), 1.0).with_gates(0, 100.0);
        assert_eq!(radar.gate_count, 1);
    }

    #[test]
    fn test_missing_field_is_an_error() {
        struct Empty;
        impl TruthState for Empty {
            fn sample(&self, _field: Field, _point: GridPoint) -> Option<f64> {
                None
            }
        }

        let mut radar = RadarSensor::new("r", GridPoint::default(), 1.0);
        let ctx = ObservationContext::new(&Empty, 0.0);
        assert_eq!(
            radar.observe(&ctx),
            Err(SensorError::FieldUnavailable(Field::RainMixingRatio))
        );
    }

    #[test]
    fn test_bad_gate_spacing_rejected() {
        let truth = UniformRain(0.0);
        let mut radar = RadarSensor::new("r", GridPoint::default(), 1.0).with_gates(4, 0.0);
        let ctx = ObservationContext::new(&truth, 0.0);
        assert!(matches!(radar.observe(&ctx), Err(SensorError::Misconfigured(_))));
    }

    #[test]
    fn test_mark_observed_drives_cadence() {
        let mut radar = RadarSensor::new("r", GridPoint::default(), 10.0);
        assert!(radar.is_due(0.0).unwrap());
        radar.mark_observed(0.0);
        assert!(!radar.is_due(5.0).unwrap());
        assert!(radar.is_due(10.0).unwrap());
    }
}
