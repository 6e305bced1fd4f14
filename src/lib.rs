//! # Weather Sensor Observation Bus
//!
//! Observation scheduling and telemetry delivery for weather simulation runs.
//! Simulated sensors are ticked against simulation time, their observations are
//! tracked per sensor, and serialized records are shipped to a remote log
//! collector on a best-effort basis.
//!
//! ## Features
//!
//! - **Per-sensor cadence**: no global sampling rate; each sensor decides when it is due
//! - **Fault isolation**: one failing sensor never aborts the rest of a tick
//! - **Debounced batching**: bursts of records become a single `POST /log`
//! - **Fail-open delivery**: the first unrecoverable collector failure disables
//!   telemetry for the rest of the run instead of stalling the simulation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wxbus::{ObservationScheduler, SinkConfig, TelemetrySink};
//! use wxbus::sensor::{Field, GridPoint, ObservationContext, TruthState};
//! use wxbus::sensors::RadarSensor;
//!
//! struct Drizzle;
//!
//! impl TruthState for Drizzle {
//!     fn sample(&self, field: Field, _point: GridPoint) -> Option<f64> {
//!         (field == Field::RainMixingRatio).then_some(2.0e-4)
//!     }
//! }
//!
//! # async fn run() -> Result<(), wxbus::telemetry::SinkError> {
//! let sink = TelemetrySink::new(SinkConfig::from_env())?;
//! sink.init().await;
//!
//! let mut scheduler = ObservationScheduler::new();
//! scheduler.add_sensor(RadarSensor::new("radar-1", GridPoint::default(), 300.0));
//!
//! let records = sink.clone();
//! scheduler.set_subscriber(move |observation| {
//!     let run_id = records.get_session().map(|s| s.run_id.clone());
//!     if let Ok(line) = wxbus::record::observation_line(observation, run_id.as_deref()) {
//!         records.enqueue(line);
//!     }
//! });
//!
//! let truth = Drizzle;
//! scheduler.update(0.0, &ObservationContext::new(&truth, 0.0));
//! sink.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`sensor`] - Sensor capability contract and observation payload
//! - [`sensors`] - Bundled radar and surface station sensors
//! - [`scheduler`] - Per-tick observation scheduling
//! - [`fault`] - Sensor fault reporting
//! - [`telemetry`] - Fail-open telemetry sink
//! - [`transport`] - Collector HTTP transport
//! - [`record`] - Default observation line format
//! - [`config`] - Environment-driven sink configuration

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod fault;
pub mod record;
pub mod scheduler;
pub mod sensor;
pub mod sensors;
pub mod telemetry;
pub mod transport;

// Re-export main public types for convenience
pub use config::SinkConfig;
pub use fault::{FaultLog, FaultSink, FaultStage};
pub use scheduler::ObservationScheduler;
pub use sensor::{ObservationContext, ObservationSet, Sensor, SensorError};
pub use telemetry::{Session, TelemetrySink};
