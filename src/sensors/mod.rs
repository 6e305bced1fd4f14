pub mod radar;
pub mod station;

pub use radar::RadarSensor;
pub use station::StationSensor;

use serde::{Deserialize, Serialize};

/// Interval-based due predicate shared by the bundled sensors.
///
/// A sensor that has never observed is due as soon as `start_seconds` is
/// reached. After that it is due once `interval_seconds` have elapsed since
/// the last accepted observation. Time going backwards never makes it due.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cadence {
    interval_seconds: f64,
    start_seconds: f64,
    last_observed: Option<f64>,
}

impl Cadence {
    pub fn new(interval_seconds: f64) -> Self {
        Self {
            // NaN.max(0.0) is 0.0, so a bad interval degrades to "every tick"
            interval_seconds: interval_seconds.max(0.0),
            start_seconds: 0.0,
            last_observed: None,
        }
    }

    pub fn with_start(mut self, start_seconds: f64) -> Self {
        if start_seconds.is_finite() {
            self.start_seconds = start_seconds;
        }
        self
    }

    pub fn is_due(&self, sim_time_seconds: f64) -> bool {
        if !sim_time_seconds.is_finite() || sim_time_seconds < self.start_seconds {
            return false;
        }

        match self.last_observed {
            None => true,
            Some(last) => sim_time_seconds - last >= self.interval_seconds,
        }
    }

    /// Stamp an accepted observation. Older stamps are ignored.
    pub fn mark(&mut self, sim_time_seconds: f64) {
        if !sim_time_seconds.is_finite() {
            return;
        }
        if self.last_observed.map_or(true, |last| sim_time_seconds >= last) {
            self.last_observed = Some(sim_time_seconds);
        }
    }

    pub fn last_observed(&self) -> Option<f64> {
        self.last_observed
    }

    pub fn interval_seconds(&self) -> f64 {
        self.interval_seconds
    }
}
