//! Observation scheduling.
//!
//! There is no global sampling rate: every tick, each registered sensor is
//! asked whether it is due. Due sensors observe, the result replaces the
//! sensor's entry in the latest-observation table, and the subscriber is told.
//! A failing sensor is reported to the fault sink and skipped; the rest of the
//! tick carries on.

use crate::fault::{FaultSink, FaultStage, TracingFaultSink};
use crate::sensor::{ObservationContext, ObservationSet, Sensor, SensorError};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Synchronous observation callback.
pub type Subscriber = Box<dyn FnMut(&Arc<ObservationSet>) + Send>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub observations: u64,
    pub empty_observations: u64,
    pub stale_discarded: u64,
    pub faults: u64,
}

struct SensorSlot {
    sensor: Box<dyn Sensor>,
    last_observed: Option<f64>,
}

#[derive(Debug, Clone)]
struct LatestEntry {
    observation: Arc<ObservationSet>,
    observed_at: f64,
}

pub struct ObservationScheduler {
    sensors: Vec<SensorSlot>,
    latest: HashMap<String, LatestEntry>,
    subscriber: Option<Subscriber>,
    fault_sink: Arc<dyn FaultSink>,
    stats: SchedulerStats,
}

impl ObservationScheduler {
    pub fn new() -> Self {
        Self::with_fault_sink(Arc::new(TracingFaultSink))
    }

    pub fn with_fault_sink(fault_sink: Arc<dyn FaultSink>) -> Self {
        Self {
            sensors: Vec::new(),
            latest: HashMap::new(),
            subscriber: None,
            fault_sink,
            stats: SchedulerStats::default(),
        }
    }

    /// Register a sensor for future ticks. Duplicate ids are not rejected.
    pub fn add_sensor<S: Sensor + 'static>(&mut self, sensor: S) {
        self.add_boxed_sensor(Box::new(sensor));
    }

    pub fn add_boxed_sensor(&mut self, sensor: Box<dyn Sensor>) {
        debug!(sensor = sensor.id(), "sensor registered");
        self.sensors.push(SensorSlot {
            sensor,
            last_observed: None,
        });
    }

    /// Install the observation callback, replacing any previous one.
    pub fn set_subscriber<F>(&mut self, subscriber: F)
    where
        F: FnMut(&Arc<ObservationSet>) + Send + 'static,
    {
        self.subscriber = Some(Box::new(subscriber));
    }

    pub fn clear_subscriber(&mut self) {
        self.subscriber = None;
    }

    /// Run one tick at `sim_time_seconds`. Non-finite times are ignored.
    pub fn update(&mut self, sim_time_seconds: f64, ctx: &ObservationContext<'_>) {
        if !sim_time_seconds.is_finite() {
            self.stats.skipped_ticks += 1;
            debug!(sim_time = sim_time_seconds, "non-finite simulation time; tick skipped");
            return;
        }

        self.stats.ticks += 1;

        for index in 0..self.sensors.len() {
            self.tick_sensor(index, sim_time_seconds, ctx);
        }
    }

    fn tick_sensor(&mut self, index: usize, sim_time_seconds: f64, ctx: &ObservationContext<'_>) {
        let slot = &mut self.sensors[index];
        let sensor_id = slot.sensor.id().to_string();

        match guarded(|| slot.sensor.is_due(sim_time_seconds)) {
            Ok(true) => {}
            Ok(false) => return,
            Err(error) => {
                self.stats.faults += 1;
                self.fault_sink
                    .report(&sensor_id, FaultStage::DueCheck, sim_time_seconds, &error);
                return;
            }
        }

        let observation = match guarded(|| slot.sensor.observe(ctx)) {
            Ok(Some(observation)) => observation,
            Ok(None) => {
                self.stats.empty_observations += 1;
                return;
            }
            Err(error) => {
                self.stats.faults += 1;
                self.fault_sink
                    .report(&sensor_id, FaultStage::Observe, sim_time_seconds, &error);
                return;
            }
        };

        if let Some(existing) = self.latest.get(&sensor_id) {
            if sim_time_seconds < existing.observed_at {
                self.stats.stale_discarded += 1;
                debug!(
                    sensor = %sensor_id,
                    sim_time = sim_time_seconds,
                    latest = existing.observed_at,
                    "stale observation discarded"
                );
                return;
            }
        }

        let marked = guarded(|| {
            slot.sensor.mark_observed(sim_time_seconds);
            Ok(())
        });
        if let Err(error) = marked {
            self.stats.faults += 1;
            self.fault_sink
                .report(&sensor_id, FaultStage::Observe, sim_time_seconds, &error);
        }
        slot.last_observed = Some(sim_time_seconds);

        let observation = Arc::new(observation);
        self.latest.insert(
            sensor_id.clone(),
            LatestEntry {
                observation: Arc::clone(&observation),
                observed_at: sim_time_seconds,
            },
        );
        self.stats.observations += 1;

        if let Some(subscriber) = self.subscriber.as_mut() {
            let notified = guarded(|| {
                subscriber(&observation);
                Ok(())
            });
            if let Err(error) = notified {
                self.stats.faults += 1;
                self.fault_sink
                    .report(&sensor_id, FaultStage::Notify, sim_time_seconds, &error);
            }
        }
    }

    pub fn get_latest(&self, sensor_id: &str) -> Option<Arc<ObservationSet>> {
        self.latest
            .get(sensor_id)
            .map(|entry| Arc::clone(&entry.observation))
    }

    /// Snapshot of every stored observation. Order is unspecified.
    pub fn get_all_latest(&self) -> Vec<Arc<ObservationSet>> {
        self.latest
            .values()
            .map(|entry| Arc::clone(&entry.observation))
            .collect()
    }

    /// Most recent accepted time across every registration with `sensor_id`.
    pub fn last_observed(&self, sensor_id: &str) -> Option<f64> {
        self.sensors
            .iter()
            .filter(|slot| slot.sensor.id() == sensor_id)
            .filter_map(|slot| slot.last_observed)
            .reduce(f64::max)
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn clear_latest(&mut self) {
        self.latest.clear();
    }
}

impl Default for ObservationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObservationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationScheduler")
            .field("sensors", &self.sensors.len())
            .field("latest", &self.latest.len())
            .field("has_subscriber", &self.subscriber.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Subscriber that forwards observations to an async consumer.
///
/// Never blocks the tick: when the channel is full or closed the observation
/// is dropped for that consumer.
pub fn channel_subscriber(capacity: usize) -> (Subscriber, mpsc::Receiver<Arc<ObservationSet>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let subscriber: Subscriber = Box::new(move |observation: &Arc<ObservationSet>| {
        if let Err(mpsc::error::TrySendError::Full(dropped)) = tx.try_send(Arc::clone(observation)) {
            debug!(sensor = %dropped.sensor_id, "observation channel full; dropped");
        }
    });
    (subscriber, rx)
}

/// Run a sensor callback, turning a panic into a `SensorError`.
fn guarded<T>(f: impl FnOnce() -> Result<T, SensorError>) -> Result<T, SensorError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(SensorError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
